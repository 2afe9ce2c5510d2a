use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{FormatKey, MediaKind, RemoteFiles, TaskService};

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// A converted file ready to be offered for download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub format: String,
    pub kind: MediaKind,
    /// e.g. `MP3 320kbps`
    pub label: String,
    pub filename: String,
    pub size_bytes: u64,
    pub human_size: String,
    pub url: String,
}

/// Binary-prefix size, two decimals: `1536 -> "1.50 KB"`.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", SIZE_UNITS[unit])
}

/// Turns the raw `files` map of a completed task into display items.
///
/// Entries without a filename or download path are dropped. Audio comes
/// before video, each in quality order.
pub fn normalize_files<S>(files: &RemoteFiles, service: &S) -> Vec<DownloadItem>
where
    S: TaskService + ?Sized,
{
    let mut items: Vec<(Option<FormatKey>, DownloadItem)> = Vec::with_capacity(files.len());
    for (key, file) in files {
        let (Some(filename), Some(path)) = (file.filename.as_ref(), file.download_url.as_ref())
        else {
            warn!(format = %key, "dropping file entry without filename or download path");
            continue;
        };
        let url = match service.resolve_download_url(path) {
            Ok(url) => url,
            Err(err) => {
                warn!(format = %key, error = %err, "dropping file entry with unusable download path");
                continue;
            }
        };
        let format = key.parse::<FormatKey>().ok();
        let kind = format
            .map(|f| f.kind())
            .or_else(|| MediaKind::from_format_prefix(key))
            .unwrap_or(MediaKind::Video);
        let label = match format {
            Some(f) => format!("{} {}", f.extension().to_uppercase(), f.quality_label()),
            None => key.to_uppercase(),
        };
        let size_bytes = file.size.unwrap_or(0);
        items.push((
            format,
            DownloadItem {
                format: key.clone(),
                kind,
                label,
                filename: filename.clone(),
                size_bytes,
                human_size: format_size(size_bytes),
                url,
            },
        ));
    }
    items.sort_by(|(a_key, a), (b_key, b)| {
        kind_rank(a.kind)
            .cmp(&kind_rank(b.kind))
            .then_with(|| match (a_key, b_key) {
                (Some(a_key), Some(b_key)) => a_key.cmp(b_key),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.format.cmp(&b.format),
            })
    });
    items.into_iter().map(|(_, item)| item).collect()
}

fn kind_rank(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::Audio => 0,
        MediaKind::Video => 1,
    }
}
