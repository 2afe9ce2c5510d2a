pub mod client;
pub mod config;
pub mod controller;
pub mod downloads;
pub mod error;
pub mod history;
pub mod preferences;
pub mod storage;
pub mod validation;

pub use client::{
    ClientError, ClientResult, FormatKey, HealthReport, HttpTaskClient, MediaKind, RemoteFile,
    RemoteFiles, SimulatedTaskClient, TaskService, TaskStatus, TaskStatusSnapshot, VideoMetadata,
};
pub use config::{load_converter_config, ConverterConfig, MetadataPolicy};
pub use controller::{
    CompletedConversion, ControllerConfig, ConversionError, ConversionEvent, ConversionOutcome,
    ConversionState, NoticeLevel, Phase, PollingController, TriggerKind,
};
pub use downloads::{format_size, normalize_files, DownloadItem};
pub use error::{ConfigError, Result};
pub use history::{HistoryEntry, HistoryStore, DEFAULT_HISTORY_LIMIT};
pub use preferences::{load_theme, save_theme, toggle_theme, Theme};
pub use storage::{LocalStore, StorageError, StorageResult};
pub use validation::{InputStatus, UrlValidator};
