use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ApiSection;
use crate::downloads::DownloadItem;

use super::error::{ClientError, ClientResult};
use super::models::{FormatKey, HealthReport, TaskStatusSnapshot, VideoMetadata};
use super::{resolve_against, wire, TaskService};

/// Talks to the conversion backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    client: Client,
    base_url: String,
    base: Url,
}

impl HttpTaskClient {
    pub fn new(client: Client, base_url: &str) -> ClientResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)?;
        Ok(Self {
            client,
            base_url,
            base,
        })
    }

    pub fn from_config(api: &ApiSection) -> ClientResult<Self> {
        let client = Client::builder().timeout(api.request_timeout()).build()?;
        Self::new(client, api.base_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn health(&self) -> ClientResult<HealthReport> {
        let response = self.client.get(self.endpoint("health")).send().await?;
        let body = checked_body(response).await?;
        Ok(serde_json::from_value(body).unwrap_or_else(|_| HealthReport {
            status: "unknown".to_string(),
            message: None,
            active_tasks: None,
        }))
    }

    /// Streams a converted file into `dir`, returning the final path.
    ///
    /// The body lands in a hidden staging file that is renamed into place once
    /// complete; a failed transfer never leaves a partial target.
    pub async fn download(&self, item: &DownloadItem, dir: &Path) -> ClientResult<PathBuf> {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| ClientError::Io {
                source,
                path: dir.to_path_buf(),
            })?;
        let target = dir.join(sanitize_filename(&item.filename));
        let staging = dir.join(format!(".{}.part", Uuid::new_v4()));

        let response = self.client.get(&item.url).send().await?.error_for_status()?;
        let written = match stream_to_file(response, &staging).await {
            Ok(written) => written,
            Err(err) => {
                discard_staging(&staging).await;
                return Err(err);
            }
        };
        if let Err(source) = fs::rename(&staging, &target).await {
            discard_staging(&staging).await;
            return Err(ClientError::Io {
                source,
                path: target,
            });
        }
        info!(file = %target.display(), bytes = written, "download saved");
        Ok(target)
    }
}

async fn stream_to_file(response: Response, path: &Path) -> ClientResult<u64> {
    let io_err = |source: io::Error| ClientError::Io {
        source,
        path: path.to_path_buf(),
    };
    let mut file = fs::File::create(path).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}

async fn discard_staging(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove partial download");
        }
    }
}

#[async_trait]
impl TaskService for HttpTaskClient {
    async fn fetch_metadata(&self, url: &str) -> ClientResult<VideoMetadata> {
        let response = self
            .client
            .post(self.endpoint("video-info"))
            .json(&json!({ "url": url }))
            .send()
            .await?;
        let body = checked_body(response).await?;
        wire::video_info_response(&body, url)
    }

    async fn start_task(&self, url: &str, formats: &[FormatKey]) -> ClientResult<String> {
        let response = self
            .client
            .post(self.endpoint("convert"))
            .json(&json!({ "url": url, "formats": formats }))
            .send()
            .await?;
        let body = checked_body(response).await?;
        wire::task_id(&body)
    }

    async fn get_status(&self, task_id: &str) -> ClientResult<TaskStatusSnapshot> {
        let response = self
            .client
            .get(self.endpoint(&format!("status/{task_id}")))
            .send()
            .await?;
        let body = checked_body(response).await?;
        debug!(%task_id, "status payload received");
        wire::ensure_success(&body, "status request rejected")?;
        Ok(wire::status_snapshot(&body))
    }

    fn resolve_download_url(&self, relative: &str) -> ClientResult<String> {
        resolve_against(&self.base, relative)
    }
}

/// Reads the body and maps non-2xx statuses to [`ClientError::Service`].
async fn checked_body(response: Response) -> ClientResult<Value> {
    let status = response.status();
    let text = response.text().await?;
    let body = wire::parse_body(&text);
    if status.is_success() {
        return Ok(body);
    }
    let message = wire::error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    });
    Err(ClientError::Service {
        status: Some(status.as_u16()),
        message,
    })
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_hang_off_the_base_path() {
        let client = HttpTaskClient::new(Client::new(), "http://localhost:5000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/api");
        assert_eq!(client.endpoint("video-info"), "http://localhost:5000/api/video-info");
        assert_eq!(client.endpoint("/status/abc"), "http://localhost:5000/api/status/abc");
    }

    #[test]
    fn download_paths_resolve_against_the_origin() {
        let client = HttpTaskClient::new(Client::new(), "http://localhost:5000/api").unwrap();
        assert_eq!(
            client.resolve_download_url("/api/download/abc/mp3_256").unwrap(),
            "http://localhost:5000/api/download/abc/mp3_256"
        );
        assert_eq!(
            client.resolve_download_url("https://cdn.example.com/f.mp3").unwrap(),
            "https://cdn.example.com/f.mp3"
        );
    }

    #[test]
    fn invalid_base_is_rejected() {
        assert!(matches!(
            HttpTaskClient::new(Client::new(), "not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn filenames_are_made_safe() {
        assert_eq!(sanitize_filename("My Song - 320kbps.mp3"), "My Song - 320kbps.mp3");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("a/b:c?.mp3"), "a_b_c_.mp3");
        assert_eq!(sanitize_filename("   "), "download");
    }
}
