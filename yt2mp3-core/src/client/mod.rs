mod error;
mod http;
mod models;
mod simulated;
mod wire;

use async_trait::async_trait;
use url::Url;

pub use error::{ClientError, ClientResult};
pub use http::HttpTaskClient;
pub use models::{
    format_duration, thumbnail_url, FormatKey, HealthReport, MediaKind, RemoteFile, RemoteFiles,
    TaskStatus, TaskStatusSnapshot, VideoMetadata,
};
pub use simulated::{SimulatedTaskClient, SIMULATED_DURATION_SECONDS};

/// Operations the conversion lifecycle needs from the backend.
///
/// `get_status` is a single poll; repetition belongs to the caller.
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> ClientResult<VideoMetadata>;

    async fn start_task(&self, url: &str, formats: &[FormatKey]) -> ClientResult<String>;

    async fn get_status(&self, task_id: &str) -> ClientResult<TaskStatusSnapshot>;

    fn resolve_download_url(&self, relative: &str) -> ClientResult<String>;
}

/// Joins a server-supplied path onto the backend origin. Absolute URLs pass through.
pub(crate) fn resolve_against(base: &Url, relative: &str) -> ClientResult<String> {
    Ok(base.join(relative.trim())?.to_string())
}
