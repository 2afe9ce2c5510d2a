use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::{ApiSection, SimulationSection};
use crate::validation::UrlValidator;

use super::error::{ClientError, ClientResult};
use super::models::{
    format_duration, thumbnail_url, FormatKey, MediaKind, RemoteFile, RemoteFiles, TaskStatus,
    TaskStatusSnapshot, VideoMetadata,
};
use super::{resolve_against, TaskService};

/// Duration reported for every simulated video.
pub const SIMULATED_DURATION_SECONDS: u64 = 225;

/// Audio track bitrate muxed into every video format.
const VIDEO_AUDIO_KBPS: u64 = 128;

const PROGRESS_STEPS: [u8; 5] = [20, 40, 60, 80, 100];

/// Unfinished tasks kept before the oldest is forgotten.
const MAX_LIVE_TASKS: usize = 32;

#[derive(Debug)]
struct SimulatedTask {
    seq: u64,
    metadata: VideoMetadata,
    formats: Vec<FormatKey>,
    polls: usize,
}

/// Offline stand-in for the conversion backend.
///
/// Every poll advances the task one step through 20/40/60/80/100 percent; the
/// last step completes it with one estimated file per requested format and
/// forgets the task.
#[derive(Debug)]
pub struct SimulatedTaskClient {
    validator: UrlValidator,
    base: Url,
    step_delay: Duration,
    jitter_ms: u64,
    next_seq: AtomicU64,
    tasks: Mutex<HashMap<String, SimulatedTask>>,
}

impl SimulatedTaskClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        Ok(Self {
            validator: UrlValidator::new(),
            base: Url::parse(base_url)?,
            step_delay: Duration::ZERO,
            jitter_ms: 0,
            next_seq: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(api: &ApiSection, simulation: &SimulationSection) -> ClientResult<Self> {
        Ok(Self::new(api.base_url())?
            .with_pacing(Duration::from_millis(simulation.step_delay_ms), simulation.jitter_ms))
    }

    /// Adds `step_delay` plus up to `jitter_ms` of random latency to each call.
    pub fn with_pacing(mut self, step_delay: Duration, jitter_ms: u64) -> Self {
        self.step_delay = step_delay;
        self.jitter_ms = jitter_ms;
        self
    }

    async fn pace(&self) {
        let mut delay = self.step_delay;
        if self.jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms));
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn metadata_for(&self, url: &str) -> ClientResult<VideoMetadata> {
        let id = self
            .validator
            .extract_id(url)
            .ok_or_else(|| ClientError::service("Unable to parse video ID"))?;
        Ok(VideoMetadata {
            title: format!("Video Title - {id}"),
            thumbnail: thumbnail_url(&id),
            id,
            duration_seconds: SIMULATED_DURATION_SECONDS,
            duration_display: format_duration(SIMULATED_DURATION_SECONDS),
            uploader: "Channel Name".to_string(),
            view_count: None,
            upload_date: None,
            placeholder: false,
        })
    }

    fn files_for(&self, task_id: &str, task: &SimulatedTask) -> RemoteFiles {
        task.formats
            .iter()
            .map(|format| {
                let file = RemoteFile {
                    filename: Some(format!(
                        "{} - {}.{}",
                        task.metadata.title,
                        format.quality_label(),
                        format.extension()
                    )),
                    size: Some(estimate_size(task.metadata.duration_seconds, *format)),
                    download_url: Some(format!("/api/download/{task_id}/{format}")),
                };
                (format.as_str().to_string(), file)
            })
            .collect()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, SimulatedTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Estimated output size in bytes for `duration_seconds` of media.
fn estimate_size(duration_seconds: u64, format: FormatKey) -> u64 {
    let kbps = match format.kind() {
        MediaKind::Audio => format.bitrate_kbps(),
        MediaKind::Video => format.bitrate_kbps() + VIDEO_AUDIO_KBPS,
    };
    duration_seconds * kbps * 1000 / 8
}

#[async_trait]
impl TaskService for SimulatedTaskClient {
    async fn fetch_metadata(&self, url: &str) -> ClientResult<VideoMetadata> {
        self.pace().await;
        self.metadata_for(url)
    }

    async fn start_task(&self, url: &str, formats: &[FormatKey]) -> ClientResult<String> {
        let metadata = self.metadata_for(url)?;
        if formats.is_empty() {
            return Err(ClientError::service("No formats requested"));
        }
        let task_id = Uuid::new_v4().to_string();
        let task = SimulatedTask {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            metadata,
            formats: formats.to_vec(),
            polls: 0,
        };
        let mut tasks = self.lock_tasks();
        if tasks.len() >= MAX_LIVE_TASKS {
            let oldest = tasks
                .iter()
                .min_by_key(|(_, task)| task.seq)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!(task_id = %oldest, "forgetting abandoned simulated task");
                tasks.remove(&oldest);
            }
        }
        tasks.insert(task_id.clone(), task);
        drop(tasks);
        debug!(%task_id, "simulated task created");
        Ok(task_id)
    }

    async fn get_status(&self, task_id: &str) -> ClientResult<TaskStatusSnapshot> {
        self.pace().await;
        let mut tasks = self.lock_tasks();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| ClientError::service("Task not found"))?;
        task.polls = (task.polls + 1).min(PROGRESS_STEPS.len());
        let progress = PROGRESS_STEPS[task.polls - 1];
        if progress < 100 {
            return Ok(TaskStatusSnapshot::running(progress));
        }
        let files = self.files_for(task_id, task);
        let task = tasks.remove(task_id);
        Ok(TaskStatusSnapshot {
            status: TaskStatus::Completed,
            progress,
            files,
            video_info: task.map(|task| task.metadata),
            error: None,
        })
    }

    fn resolve_download_url(&self, relative: &str) -> ClientResult<String> {
        resolve_against(&self.base, relative)
    }
}
