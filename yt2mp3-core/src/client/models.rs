use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Bucket for a raw format string, decided by its `mp3`/`mp4` prefix.
    pub fn from_format_prefix(key: &str) -> Option<Self> {
        if key.starts_with("mp3") {
            Some(MediaKind::Audio)
        } else if key.starts_with("mp4") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormatKey {
    #[serde(rename = "mp3_128")]
    Audio128,
    #[serde(rename = "mp3_256")]
    Audio256,
    #[serde(rename = "mp3_320")]
    Audio320,
    #[serde(rename = "mp4_360")]
    Video360,
    #[serde(rename = "mp4_720")]
    Video720,
    #[serde(rename = "mp4_1080")]
    Video1080,
}

impl FormatKey {
    pub const ALL: [FormatKey; 6] = [
        FormatKey::Audio128,
        FormatKey::Audio256,
        FormatKey::Audio320,
        FormatKey::Video360,
        FormatKey::Video720,
        FormatKey::Video1080,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKey::Audio128 => "mp3_128",
            FormatKey::Audio256 => "mp3_256",
            FormatKey::Audio320 => "mp3_320",
            FormatKey::Video360 => "mp4_360",
            FormatKey::Video720 => "mp4_720",
            FormatKey::Video1080 => "mp4_1080",
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            FormatKey::Audio128 | FormatKey::Audio256 | FormatKey::Audio320 => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }

    /// Quality label shown next to the file, e.g. `320kbps` or `720p`.
    pub fn quality_label(&self) -> &'static str {
        match self {
            FormatKey::Audio128 => "128kbps",
            FormatKey::Audio256 => "256kbps",
            FormatKey::Audio320 => "320kbps",
            FormatKey::Video360 => "360p",
            FormatKey::Video720 => "720p",
            FormatKey::Video1080 => "1080p",
        }
    }

    /// Nominal stream bitrate; for video this excludes the 128 kbps audio track.
    pub fn bitrate_kbps(&self) -> u64 {
        match self {
            FormatKey::Audio128 => 128,
            FormatKey::Audio256 => 256,
            FormatKey::Audio320 => 320,
            FormatKey::Video360 => 800,
            FormatKey::Video720 => 2500,
            FormatKey::Video1080 => 5000,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.kind() {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }
}

impl fmt::Display for FormatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatKey {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormatKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s.trim())
            .ok_or_else(|| ClientError::UnknownFormat(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    /// Maps a backend status string, accepting the aliases older backends emit.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(TaskStatus::Pending),
            "running" | "processing" => Some(TaskStatus::Running),
            "completed" | "complete" => Some(TaskStatus::Completed),
            "error" | "failed" => Some(TaskStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub duration_seconds: u64,
    pub duration_display: String,
    pub thumbnail: String,
    pub uploader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    /// Set when the record was substituted because the real lookup failed.
    #[serde(default)]
    pub placeholder: bool,
}

impl VideoMetadata {
    pub fn placeholder(video_id: Option<&str>) -> Self {
        let id = video_id.unwrap_or("unknown").to_string();
        let thumbnail = match video_id {
            Some(id) => thumbnail_url(id),
            None => String::new(),
        };
        Self {
            title: format!("Video {id}"),
            id,
            duration_seconds: 0,
            duration_display: format_duration(0),
            thumbnail,
            uploader: "Unknown".to_string(),
            view_count: None,
            upload_date: None,
            placeholder: true,
        }
    }
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/mqdefault.jpg")
}

/// `m:ss` below an hour, `h:mm:ss` above.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// One entry of the `files` map; any field may be absent on an untrusted payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub download_url: Option<String>,
}

pub type RemoteFiles = BTreeMap<String, RemoteFile>;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusSnapshot {
    pub status: TaskStatus,
    pub progress: u8,
    pub files: RemoteFiles,
    pub video_info: Option<VideoMetadata>,
    pub error: Option<String>,
}

impl TaskStatusSnapshot {
    pub fn running(progress: u8) -> Self {
        Self {
            status: TaskStatus::Running,
            progress,
            files: RemoteFiles::new(),
            video_info: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub active_tasks: Option<u64>,
}
