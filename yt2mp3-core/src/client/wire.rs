//! Lenient decoding of backend payloads.
//!
//! Backend payloads vary between deployments. Nothing here fails on a missing
//! or wrong-typed field: numbers fall back to zero, maps to empty and optional
//! records to `None`.

use serde_json::{Map, Value};
use tracing::warn;

use super::error::{ClientError, ClientResult};
use super::models::{
    format_duration, thumbnail_url, RemoteFile, RemoteFiles, TaskStatus, TaskStatusSnapshot,
    VideoMetadata,
};

/// Reads a JSON body, treating an unparseable one as an empty object.
pub(crate) fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Extracts the message of an `{"error": ...}` body.
pub(crate) fn error_message(body: &Value) -> Option<String> {
    string_field(body, "error").or_else(|| string_field(body, "message"))
}

/// Rejects `success: false` envelopes. A missing flag counts as success.
pub(crate) fn ensure_success(body: &Value, fallback: &str) -> ClientResult<()> {
    match body.get("success").and_then(Value::as_bool) {
        Some(false) => Err(ClientError::service(
            error_message(body).unwrap_or_else(|| fallback.to_string()),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn task_id(body: &Value) -> ClientResult<String> {
    ensure_success(body, "conversion request rejected")?;
    match body.get("task_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ClientError::service("response did not include a task id")),
    }
}

pub(crate) fn video_info_response(body: &Value, url: &str) -> ClientResult<VideoMetadata> {
    ensure_success(body, "video information request rejected")?;
    match body.get("data") {
        Some(data @ Value::Object(_)) => Ok(video_metadata(data).unwrap_or_else(|| {
            warn!(%url, "video information payload had no usable fields");
            VideoMetadata::placeholder(None)
        })),
        _ => Err(ClientError::service("response did not include video information")),
    }
}

/// Decodes one status poll.
///
/// A rejected envelope, or a payload carrying an error but no recognizable
/// status, is reported as [`TaskStatus::Error`] so polling stops.
pub(crate) fn status_snapshot(body: &Value) -> TaskStatusSnapshot {
    let rejected = body.get("success").and_then(Value::as_bool) == Some(false);
    let mut error = string_field(body, "error");
    let status = match body.get("status").and_then(Value::as_str) {
        _ if rejected => {
            error = Some(
                error_message(body).unwrap_or_else(|| "status request rejected".to_string()),
            );
            TaskStatus::Error
        }
        Some(raw) => match TaskStatus::from_wire(raw) {
            Some(status) => status,
            None if error.is_some() => {
                warn!(status = raw, "unknown task status with an error message, treating as error");
                TaskStatus::Error
            }
            None => {
                warn!(status = raw, "unknown task status, treating as pending");
                TaskStatus::Pending
            }
        },
        None if error.is_some() => {
            warn!("status payload carries only an error, treating as error");
            TaskStatus::Error
        }
        None => {
            warn!("status payload without status field, treating as pending");
            TaskStatus::Pending
        }
    };
    let files = match body.get("files") {
        Some(Value::Object(map)) => remote_files(map),
        Some(Value::Null) | None => RemoteFiles::new(),
        Some(other) => {
            warn!(kind = value_kind(other), "ignoring malformed files field");
            RemoteFiles::new()
        }
    };
    TaskStatusSnapshot {
        status,
        progress: progress(body.get("progress")),
        files,
        video_info: body.get("video_info").and_then(video_metadata),
        error,
    }
}

/// Progress as a percentage; anything that is not a number becomes 0.
pub(crate) fn progress(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_finite() {
        raw.clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

pub(crate) fn video_metadata(value: &Value) -> Option<VideoMetadata> {
    let object = value.as_object()?;
    if object.is_empty() {
        return None;
    }
    let id = string_field(value, "id").unwrap_or_default();
    let duration_seconds = unsigned(value.get("duration")).unwrap_or(0);
    let duration_display = string_field(value, "duration_string")
        .unwrap_or_else(|| format_duration(duration_seconds));
    let thumbnail = string_field(value, "thumbnail").unwrap_or_else(|| {
        if id.is_empty() {
            String::new()
        } else {
            thumbnail_url(&id)
        }
    });
    Some(VideoMetadata {
        title: string_field(value, "title").unwrap_or_else(|| format!("Video {id}")),
        duration_seconds,
        duration_display,
        thumbnail,
        uploader: string_field(value, "uploader")
            .or_else(|| string_field(value, "channel"))
            .unwrap_or_else(|| "Unknown".to_string()),
        view_count: unsigned(value.get("view_count")),
        upload_date: string_field(value, "upload_date"),
        placeholder: false,
        id,
    })
}

fn remote_files(map: &Map<String, Value>) -> RemoteFiles {
    map.iter()
        .map(|(key, entry)| {
            let file = RemoteFile {
                filename: string_field(entry, "filename"),
                size: unsigned(entry.get("size")),
                download_url: string_field(entry, "download_url"),
            };
            (key.clone(), file)
        })
        .collect()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn unsigned(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_progress_and_files_are_coerced() {
        let snapshot = status_snapshot(&json!({ "status": "running" }));
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.files.is_empty());
        assert!(snapshot.video_info.is_none());
    }

    #[test]
    fn malformed_fields_never_raise() {
        let snapshot = status_snapshot(&json!({
            "status": 42,
            "progress": "abc",
            "files": ["not", "a", "map"],
            "video_info": "nope",
        }));
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.files.is_empty());
        assert!(snapshot.video_info.is_none());
    }

    #[test]
    fn rejected_or_error_only_status_is_terminal() {
        let snapshot = status_snapshot(&json!({ "success": false, "error": "backend exploded" }));
        assert_eq!(snapshot.status, TaskStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("backend exploded"));

        let snapshot = status_snapshot(&json!({ "success": false, "status": "running" }));
        assert_eq!(snapshot.status, TaskStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("status request rejected"));

        let snapshot = status_snapshot(&json!({ "error": "Task not found" }));
        assert_eq!(snapshot.status, TaskStatus::Error);

        let snapshot = status_snapshot(&json!({ "status": "exploded", "error": "disk full" }));
        assert_eq!(snapshot.status, TaskStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("disk full"));

        let snapshot = status_snapshot(&json!({ "status": "downloading", "message": "50%" }));
        assert_eq!(snapshot.status, TaskStatus::Pending);

        // A healthy running status never turns into an error because of stray text.
        let snapshot = status_snapshot(&json!({ "status": "running", "progress": 30 }));
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn progress_is_clamped_and_truncated() {
        assert_eq!(progress(Some(&json!(150))), 100);
        assert_eq!(progress(Some(&json!(-3))), 0);
        assert_eq!(progress(Some(&json!(42.9))), 42);
        assert_eq!(progress(Some(&json!("55%"))), 55);
        assert_eq!(progress(None), 0);
    }

    #[test]
    fn completed_payload_keeps_partial_file_entries() {
        let snapshot = status_snapshot(&json!({
            "status": "completed",
            "progress": 100,
            "files": {
                "mp3_256": {
                    "filename": "song.mp3",
                    "size": 4_194_304,
                    "download_url": "/api/download/abc/mp3_256"
                },
                "mp4_720": { "size": "oops" }
            },
            "video_info": { "id": "dQw4w9WgXcQ", "title": "Song", "duration": 212 }
        }));
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.files["mp3_256"].size, Some(4_194_304));
        assert_eq!(snapshot.files["mp4_720"], RemoteFile::default());
        let info = snapshot.video_info.unwrap();
        assert_eq!(info.duration_display, "3:32");
        assert_eq!(info.uploader, "Unknown");
    }

    #[test]
    fn rejected_envelopes_become_service_errors() {
        let err = task_id(&json!({ "success": false, "error": "quota exceeded" })).unwrap_err();
        assert!(matches!(err, ClientError::Service { ref message, .. } if message == "quota exceeded"));
        assert!(task_id(&json!({ "success": true })).is_err());
        assert_eq!(task_id(&json!({ "success": true, "task_id": "abc" })).unwrap(), "abc");
    }

    #[test]
    fn video_info_requires_data_object() {
        assert!(video_info_response(&json!({ "success": true }), "u").is_err());
        let meta = video_info_response(
            &json!({ "success": true, "data": { "id": "dQw4w9WgXcQ", "title": "T",
                "duration": 225, "duration_string": "3:45", "uploader": "U" } }),
            "u",
        )
        .unwrap();
        assert_eq!(meta.title, "T");
        assert_eq!(meta.duration_display, "3:45");
        assert!(!meta.placeholder);
    }

    #[test]
    fn unparseable_body_is_empty_object() {
        assert_eq!(parse_body("<html>"), json!({}));
    }
}
