use std::fmt;

use serde::Serialize;

use crate::client::VideoMetadata;
use crate::downloads::DownloadItem;

use super::error::ConversionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    Idle,
    Validating,
    FetchingMetadata,
    Starting,
    Polling,
    Completed,
    Failed,
}

impl ConversionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionState::Idle => "idle",
            ConversionState::Validating => "validating",
            ConversionState::FetchingMetadata => "fetching_metadata",
            ConversionState::Starting => "starting",
            ConversionState::Polling => "polling",
            ConversionState::Completed => "completed",
            ConversionState::Failed => "failed",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ConversionState::Idle)
    }
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable stage derived from progress bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Downloading,
    Extracting,
    Converting,
    Optimizing,
    Finalizing,
    Complete,
}

impl Phase {
    pub fn from_progress(progress: u8) -> Self {
        match progress {
            0..=19 => Phase::Downloading,
            20..=39 => Phase::Extracting,
            40..=59 => Phase::Converting,
            60..=79 => Phase::Optimizing,
            80..=99 => Phase::Finalizing,
            _ => Phase::Complete,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Downloading => "Downloading video...",
            Phase::Extracting => "Extracting audio...",
            Phase::Converting => "Converting format...",
            Phase::Optimizing => "Optimizing quality...",
            Phase::Finalizing => "Finalizing...",
            Phase::Complete => "Conversion complete!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversionEvent {
    StateChanged {
        state: ConversionState,
    },
    Metadata {
        metadata: VideoMetadata,
    },
    TaskStarted {
        task_id: String,
    },
    Progress {
        task_id: String,
        progress: u8,
        phase: Phase,
    },
    Completed {
        task_id: String,
        downloads: Vec<DownloadItem>,
    },
    Failed {
        message: String,
    },
    /// Transient user-facing message.
    Notice {
        level: NoticeLevel,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedConversion {
    pub task_id: String,
    pub url: String,
    pub metadata: VideoMetadata,
    pub downloads: Vec<DownloadItem>,
}

#[derive(Debug)]
pub enum ConversionOutcome {
    Completed(CompletedConversion),
    Failed(ConversionError),
    /// Another conversion was active; nothing happened.
    Skipped,
    /// The session was cancelled or replaced before it finished.
    Superseded,
}

impl ConversionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ConversionOutcome::Completed(_))
    }
}
