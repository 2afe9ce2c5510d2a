//! Lifecycle of a single conversion.
//!
//! `Idle -> Validating -> FetchingMetadata -> Starting -> Polling ->
//! {Completed | Failed} -> Idle`. Only one session may be outside `Idle`;
//! every status poll is awaited before the next one is scheduled.

mod error;
mod events;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{FormatKey, RemoteFiles, TaskService, TaskStatus, VideoMetadata};
use crate::config::{ConverterConfig, MetadataPolicy};
use crate::downloads::normalize_files;
use crate::history::{HistoryEntry, HistoryStore};
use crate::storage::StorageResult;
use crate::validation::UrlValidator;

pub use error::ConversionError;
pub use events::{
    CompletedConversion, ConversionEvent, ConversionOutcome, ConversionState, NoticeLevel, Phase,
};

const EVENT_CAPACITY: usize = 128;

/// What caused a debounced auto-start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Paste,
    Input,
    Redownload,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub poll_interval: Duration,
    pub metadata_policy: MetadataPolicy,
    pub formats: Vec<FormatKey>,
    pub paste_debounce: Duration,
    pub input_debounce: Duration,
    pub redownload_debounce: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            metadata_policy: MetadataPolicy::default(),
            formats: FormatKey::ALL.to_vec(),
            paste_debounce: Duration::from_millis(500),
            input_debounce: Duration::from_millis(800),
            redownload_debounce: Duration::from_millis(1000),
        }
    }
}

impl ControllerConfig {
    pub fn from_config(config: &ConverterConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.polling.interval_ms),
            metadata_policy: config.polling.metadata_policy,
            formats: FormatKey::ALL.to_vec(),
            paste_debounce: Duration::from_millis(config.debounce.paste_ms),
            input_debounce: Duration::from_millis(config.debounce.input_ms),
            redownload_debounce: Duration::from_millis(config.debounce.redownload_ms),
        }
    }

    pub fn debounce_for(&self, kind: TriggerKind) -> Duration {
        match kind {
            TriggerKind::Paste => self.paste_debounce,
            TriggerKind::Input => self.input_debounce,
            TriggerKind::Redownload => self.redownload_debounce,
        }
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    token: CancellationToken,
}

#[derive(Debug)]
struct PendingTrigger {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Inner {
    next_session: u64,
    session: Option<Session>,
    next_trigger: u64,
    trigger: Option<PendingTrigger>,
}

/// Drives one conversion at a time against a [`TaskService`].
pub struct PollingController {
    service: Arc<dyn TaskService>,
    validator: UrlValidator,
    config: ControllerConfig,
    history: Mutex<HistoryStore>,
    inner: Mutex<Inner>,
    state: watch::Sender<ConversionState>,
    events: broadcast::Sender<ConversionEvent>,
}

/// Returns the controller to `Idle` when a session ends, however it ends.
struct SessionGuard<'a> {
    controller: &'a PollingController,
    id: u64,
    token: CancellationToken,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.controller.finish_session(self.id);
    }
}

impl PollingController {
    pub fn new(
        service: Arc<dyn TaskService>,
        history: HistoryStore,
        config: ControllerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConversionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service,
            validator: UrlValidator::new(),
            config,
            history: Mutex::new(history),
            inner: Mutex::new(Inner::default()),
            state,
            events,
        }
    }

    pub fn state(&self) -> ConversionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConversionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn validator(&self) -> &UrlValidator {
        &self.validator
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock_history().entries().to_vec()
    }

    pub fn clear_history(&self) -> StorageResult<()> {
        self.lock_history().clear()
    }

    /// Runs a full conversion with the configured formats.
    pub async fn start(&self, url: &str) -> ConversionOutcome {
        let formats = self.config.formats.clone();
        self.start_with_formats(url, &formats).await
    }

    /// Runs a full conversion. A no-op returning `Skipped` while another is active.
    pub async fn start_with_formats(&self, url: &str, formats: &[FormatKey]) -> ConversionOutcome {
        let Some(session) = self.begin_session() else {
            debug!("conversion already in progress, ignoring start");
            return ConversionOutcome::Skipped;
        };
        let url = url.trim();
        let outcome = self.run_session(&session, url, formats).await;
        match &outcome {
            ConversionOutcome::Completed(done) => {
                self.transition(session.id, ConversionState::Completed);
                info!(task_id = %done.task_id, files = done.downloads.len(), "conversion completed");
                self.emit(ConversionEvent::Completed {
                    task_id: done.task_id.clone(),
                    downloads: done.downloads.clone(),
                });
                self.notify(NoticeLevel::Success, "All formats converted successfully!");
            }
            ConversionOutcome::Failed(err) if err.is_validation() => {
                self.notify(NoticeLevel::Error, err.to_string());
            }
            ConversionOutcome::Failed(err) => {
                self.transition(session.id, ConversionState::Failed);
                warn!(error = %err, %url, "conversion failed");
                self.emit(ConversionEvent::Failed {
                    message: err.to_string(),
                });
                self.notify(NoticeLevel::Error, format!("Conversion failed: {err}"));
            }
            ConversionOutcome::Superseded => {
                info!(%url, "conversion superseded");
            }
            ConversionOutcome::Skipped => {}
        }
        drop(session);
        outcome
    }

    /// Cancels the active session, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let inner = self.lock_inner();
        match inner.session.as_ref() {
            Some(session) => {
                info!(session = session.id, "cancelling active conversion");
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels whatever is running, waits for it to wind down, then starts `url`.
    pub async fn restart(&self, url: &str) -> ConversionOutcome {
        let mut state = self.watch_state();
        if self.cancel() {
            // The sender lives as long as `self`, so this only returns once idle.
            let _ = state.wait_for(ConversionState::is_idle).await;
        }
        self.start(url).await
    }

    /// Schedules a debounced start, replacing any pending one.
    ///
    /// Ignored for invalid links or while a conversion is active.
    pub fn schedule_auto(self: &Arc<Self>, url: impl Into<String>, kind: TriggerKind) -> bool {
        let url = url.into();
        let mut inner = self.lock_inner();
        if let Some(pending) = inner.trigger.take() {
            pending.handle.abort();
        }
        if !self.validator.is_valid(&url) || inner.session.is_some() {
            return false;
        }
        let generation = inner.next_trigger;
        inner.next_trigger += 1;
        let delay = self.config.debounce_for(kind);
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if !controller.take_trigger(generation) {
                return;
            }
            debug!(?kind, "auto-start firing");
            controller.start(&url).await;
        });
        inner.trigger = Some(PendingTrigger { generation, handle });
        true
    }

    /// Drops the pending auto-start, if any.
    pub fn cancel_auto(&self) -> bool {
        match self.lock_inner().trigger.take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_pending_auto(&self) -> bool {
        self.lock_inner().trigger.is_some()
    }

    fn take_trigger(&self, generation: u64) -> bool {
        let mut inner = self.lock_inner();
        let current = inner.trigger.as_ref().map(|pending| pending.generation) == Some(generation);
        if current {
            inner.trigger = None;
        }
        current
    }

    fn begin_session(&self) -> Option<SessionGuard<'_>> {
        let mut inner = self.lock_inner();
        if inner.session.is_some() {
            return None;
        }
        if let Some(pending) = inner.trigger.take() {
            pending.handle.abort();
        }
        inner.next_session += 1;
        let id = inner.next_session;
        let token = CancellationToken::new();
        inner.session = Some(Session {
            id,
            token: token.clone(),
        });
        self.state.send_replace(ConversionState::Validating);
        drop(inner);
        self.emit(ConversionEvent::StateChanged {
            state: ConversionState::Validating,
        });
        Some(SessionGuard {
            controller: self,
            id,
            token,
        })
    }

    fn finish_session(&self, id: u64) {
        let mut inner = self.lock_inner();
        if inner.session.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        inner.session = None;
        if let Some(pending) = inner.trigger.take() {
            pending.handle.abort();
        }
        self.state.send_replace(ConversionState::Idle);
        drop(inner);
        self.emit(ConversionEvent::StateChanged {
            state: ConversionState::Idle,
        });
    }

    /// Moves the session to `state`; false when the session is no longer current.
    fn transition(&self, id: u64, state: ConversionState) -> bool {
        let inner = self.lock_inner();
        if inner.session.as_ref().map(|s| s.id) != Some(id) {
            return false;
        }
        self.state.send_replace(state);
        drop(inner);
        debug!(session = id, %state, "conversion state changed");
        self.emit(ConversionEvent::StateChanged { state });
        true
    }

    async fn run_session(
        &self,
        session: &SessionGuard<'_>,
        url: &str,
        formats: &[FormatKey],
    ) -> ConversionOutcome {
        if !self.validator.is_valid(url) {
            return ConversionOutcome::Failed(ConversionError::Validation(
                "Please enter a valid YouTube link".to_string(),
            ));
        }
        if formats.is_empty() {
            return ConversionOutcome::Failed(ConversionError::Validation(
                "Select at least one output format".to_string(),
            ));
        }

        if !self.transition(session.id, ConversionState::FetchingMetadata) {
            return ConversionOutcome::Superseded;
        }
        let metadata = match cancellable(&session.token, self.resolve_metadata(url)).await {
            None => return ConversionOutcome::Superseded,
            Some(Err(err)) => return ConversionOutcome::Failed(err),
            Some(Ok(metadata)) => metadata,
        };
        self.emit(ConversionEvent::Metadata {
            metadata: metadata.clone(),
        });

        if !self.transition(session.id, ConversionState::Starting) {
            return ConversionOutcome::Superseded;
        }
        let task_id = match cancellable(&session.token, self.service.start_task(url, formats)).await
        {
            None => return ConversionOutcome::Superseded,
            Some(Err(err)) => return ConversionOutcome::Failed(err.into()),
            Some(Ok(task_id)) => task_id,
        };
        info!(%task_id, %url, "conversion task started");
        self.emit(ConversionEvent::TaskStarted {
            task_id: task_id.clone(),
        });

        if !self.transition(session.id, ConversionState::Polling) {
            return ConversionOutcome::Superseded;
        }
        self.poll(session, url, &task_id, metadata).await
    }

    /// The single place a failed metadata lookup is handled.
    async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata, ConversionError> {
        match self.service.fetch_metadata(url).await {
            Ok(metadata) => Ok(metadata),
            Err(err) => match self.config.metadata_policy {
                MetadataPolicy::Propagate => Err(err.into()),
                MetadataPolicy::Placeholder => {
                    warn!(error = %err, %url, "video information unavailable, using placeholder");
                    self.notify(
                        NoticeLevel::Warning,
                        "Video information unavailable, continuing without it",
                    );
                    let id = self.validator.extract_id(url);
                    Ok(VideoMetadata::placeholder(id.as_deref()))
                }
            },
        }
    }

    async fn poll(
        &self,
        session: &SessionGuard<'_>,
        url: &str,
        task_id: &str,
        mut metadata: VideoMetadata,
    ) -> ConversionOutcome {
        let mut progress = 0u8;
        loop {
            if cancellable(&session.token, sleep(self.config.poll_interval))
                .await
                .is_none()
            {
                return ConversionOutcome::Superseded;
            }
            let Some(result) = cancellable(&session.token, self.service.get_status(task_id)).await
            else {
                return ConversionOutcome::Superseded;
            };
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(err) => return ConversionOutcome::Failed(err.into()),
            };
            debug!(%task_id, status = %snapshot.status, progress = snapshot.progress, "polled task");

            match snapshot.status {
                TaskStatus::Pending | TaskStatus::Running => {
                    progress = progress.max(snapshot.progress.min(99));
                    self.emit(ConversionEvent::Progress {
                        task_id: task_id.to_string(),
                        progress,
                        phase: Phase::from_progress(progress),
                    });
                }
                TaskStatus::Error => {
                    let message = snapshot
                        .error
                        .unwrap_or_else(|| "the service reported an error".to_string());
                    return ConversionOutcome::Failed(ConversionError::Task(message));
                }
                TaskStatus::Completed => {
                    self.emit(ConversionEvent::Progress {
                        task_id: task_id.to_string(),
                        progress: 100,
                        phase: Phase::Complete,
                    });
                    if metadata.placeholder {
                        if let Some(info) = snapshot.video_info {
                            metadata = info;
                        }
                    }
                    let downloads = normalize_files(&snapshot.files, self.service.as_ref());
                    if downloads.is_empty() {
                        return ConversionOutcome::Failed(ConversionError::Task(
                            "conversion finished without any downloadable files".to_string(),
                        ));
                    }
                    self.record_history(url, task_id, &metadata, snapshot.files);
                    return ConversionOutcome::Completed(CompletedConversion {
                        task_id: task_id.to_string(),
                        url: url.to_string(),
                        metadata,
                        downloads,
                    });
                }
            }
        }
    }

    fn record_history(
        &self,
        url: &str,
        task_id: &str,
        metadata: &VideoMetadata,
        files: RemoteFiles,
    ) {
        let entry = HistoryEntry {
            url: url.to_string(),
            video_info: metadata.clone(),
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            files,
        };
        if let Err(err) = self.lock_history().append(entry) {
            warn!(error = %err, %task_id, "failed to persist history");
        }
    }

    fn emit(&self, event: ConversionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(ConversionEvent::Notice {
            level,
            message: message.into(),
        });
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_history(&self) -> MutexGuard<'_, HistoryStore> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs `future` unless `token` is cancelled first; output racing a cancellation is dropped.
async fn cancellable<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = future => Some(output),
    }
}
