use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use yt2mp3_core::{
    load_converter_config, load_theme, normalize_files, save_theme, toggle_theme, ClientError,
    ConfigError, ControllerConfig, ConversionError, ConversionEvent, ConversionOutcome,
    ConverterConfig, DownloadItem, FormatKey, HealthReport, HistoryStore, HttpTaskClient,
    InputStatus, LocalStore, PollingController, SimulatedTaskClient, StorageError, TaskService,
    Theme, UrlValidator,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("service error: {0}")]
    Client(#[from] ClientError),
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no history entry at index {0}")]
    MissingEntry(usize),
    #[error("{0} is unavailable in simulation mode")]
    Simulated(&'static str),
    #[error("conversion did not finish")]
    Interrupted,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "YouTube to MP3/MP4 conversion client", long_about = None)]
pub struct Cli {
    /// Path to yt2mp3.toml
    #[arg(long, default_value = "configs/yt2mp3.toml")]
    pub config: PathBuf,
    /// Data directory override (replaces storage.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Backend address override, including the /api prefix
    #[arg(long)]
    pub base_url: Option<String>,
    /// Use the offline backend simulation
    #[arg(long, default_value_t = false)]
    pub simulate: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a video and wait for the result
    Convert(ConvertArgs),
    /// Check a link without contacting the backend
    Validate(ValidateArgs),
    /// Conversion history
    #[command(subcommand)]
    History(HistoryCommands),
    /// Color theme preference
    #[command(subcommand)]
    Theme(ThemeCommands),
    /// Query backend health
    Health,
    /// Download files from a past conversion
    Download(DownloadArgs),
    /// Print shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    pub url: String,
    /// Formats to produce, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub formats: Vec<FormatKey>,
    /// Save the converted files into this directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    pub url: String,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// List past conversions, newest first
    List(HistoryListArgs),
    /// Remove every entry
    Clear,
    /// Convert a past entry's link again
    Reconvert(ReconvertArgs),
}

#[derive(Args, Debug)]
pub struct HistoryListArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ReconvertArgs {
    /// Position in `history list`
    pub index: usize,
    #[arg(long, value_delimiter = ',')]
    pub formats: Vec<FormatKey>,
}

#[derive(Subcommand, Debug)]
pub enum ThemeCommands {
    Show,
    Set(ThemeSetArgs),
    Toggle,
}

#[derive(Args, Debug)]
pub struct ThemeSetArgs {
    /// `light` or `dark`
    pub theme: Theme,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Position in `history list`
    pub index: usize,
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
    /// Only these formats, comma separated
    #[arg(long, value_delimiter = ',')]
    pub formats: Vec<FormatKey>,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "yt2mp3ctl", &mut io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    init_tracing(&context.config.logging.level);
    debug!(
        data_dir = %context.data_dir.display(),
        simulated = context.config.simulation.enabled,
        base_url = context.config.api.base_url(),
        "context ready"
    );

    match &cli.command {
        Commands::Convert(args) => {
            let report = context
                .convert(&args.url, &args.formats, args.output_dir.as_deref(), cli.format)
                .await?;
            render(&report, cli.format)?;
        }
        Commands::Validate(args) => {
            render(&context.validate(&args.url), cli.format)?;
        }
        Commands::History(HistoryCommands::List(args)) => {
            render(&context.history_list(args.limit), cli.format)?;
        }
        Commands::History(HistoryCommands::Clear) => {
            render(&context.history_clear()?, cli.format)?;
        }
        Commands::History(HistoryCommands::Reconvert(args)) => {
            let report = context.reconvert(args.index, &args.formats, cli.format).await?;
            render(&report, cli.format)?;
        }
        Commands::Theme(command) => {
            render(&context.theme(command)?, cli.format)?;
        }
        Commands::Health => {
            render(&context.health().await?, cli.format)?;
        }
        Commands::Download(args) => {
            render(&context.download(args).await?, cli.format)?;
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        level.parse::<EnvFilter>().unwrap_or_else(|err| {
            eprintln!("invalid logging.level '{level}' ({err}), falling back to 'info'");
            EnvFilter::new("info")
        })
    });
    // A subscriber may already be installed (tests).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
enum Backend {
    Http(Arc<HttpTaskClient>),
    Simulated(Arc<SimulatedTaskClient>),
}

impl Backend {
    fn service(&self) -> Arc<dyn TaskService> {
        match self {
            Backend::Http(client) => client.clone() as Arc<dyn TaskService>,
            Backend::Simulated(client) => client.clone() as Arc<dyn TaskService>,
        }
    }

    fn http(&self, action: &'static str) -> Result<&HttpTaskClient> {
        match self {
            Backend::Http(client) => Ok(client),
            Backend::Simulated(_) => Err(AppError::Simulated(action)),
        }
    }
}

#[derive(Debug)]
struct AppContext {
    config: ConverterConfig,
    data_dir: PathBuf,
    store: LocalStore,
    backend: Backend,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_converter_config(&cli.config)?;
        if let Some(base_url) = &cli.base_url {
            config.api.base_url_override = Some(base_url.clone());
        }
        if cli.simulate {
            config.simulation.enabled = true;
        }

        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.storage.data_dir));
        let store = LocalStore::open(&data_dir)?;

        let backend = if config.simulation.enabled {
            Backend::Simulated(Arc::new(SimulatedTaskClient::from_config(
                &config.api,
                &config.simulation,
            )?))
        } else {
            Backend::Http(Arc::new(HttpTaskClient::from_config(&config.api)?))
        };

        Ok(Self {
            config,
            data_dir,
            store,
            backend,
        })
    }

    fn history_store(&self) -> HistoryStore {
        HistoryStore::load(self.store.clone(), self.config.storage.history_limit)
    }

    fn controller(&self) -> PollingController {
        PollingController::new(
            self.backend.service(),
            self.history_store(),
            ControllerConfig::from_config(&self.config),
        )
    }

    async fn convert(
        &self,
        url: &str,
        formats: &[FormatKey],
        output_dir: Option<&Path>,
        format: OutputFormat,
    ) -> Result<ConversionReport> {
        let downloader = match output_dir {
            Some(_) => Some(self.backend.http("downloading files")?),
            None => None,
        };
        let formats = if formats.is_empty() {
            FormatKey::ALL.to_vec()
        } else {
            formats.to_vec()
        };

        let controller = self.controller();
        let printer = (format == OutputFormat::Text).then(|| {
            let mut events = controller.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => print_progress(&event),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        });

        let outcome = controller.start_with_formats(url, &formats).await;
        drop(controller);
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        let done = match outcome {
            ConversionOutcome::Completed(done) => done,
            ConversionOutcome::Failed(err) => return Err(err.into()),
            ConversionOutcome::Skipped | ConversionOutcome::Superseded => {
                return Err(AppError::Interrupted)
            }
        };

        let mut saved = Vec::new();
        if let (Some(client), Some(dir)) = (downloader, output_dir) {
            tokio::fs::create_dir_all(dir).await?;
            for item in &done.downloads {
                saved.push(client.download(item, dir).await?);
            }
        }

        Ok(ConversionReport {
            task_id: done.task_id,
            url: done.url,
            title: done.metadata.title,
            duration: done.metadata.duration_display,
            placeholder_metadata: done.metadata.placeholder,
            downloads: done.downloads,
            saved,
        })
    }

    fn validate(&self, url: &str) -> ValidationReport {
        let validator = UrlValidator::new();
        ValidationReport {
            url: url.trim().to_string(),
            status: validator.input_status(url),
            video_id: validator.extract_id(url),
        }
    }

    fn history_list(&self, limit: usize) -> HistoryList {
        let history = self.history_store();
        let rows = history
            .entries()
            .iter()
            .take(limit)
            .enumerate()
            .map(|(index, entry)| HistoryRow {
                index,
                title: entry.video_info.title.clone(),
                url: entry.url.clone(),
                task_id: entry.task_id.clone(),
                timestamp: entry.timestamp,
                formats: entry.files.keys().cloned().collect(),
            })
            .collect();
        HistoryList {
            total: history.len(),
            rows,
        }
    }

    fn history_clear(&self) -> Result<HistoryCleared> {
        let mut history = self.history_store();
        let removed = history.len();
        history.clear()?;
        info!(removed, "history cleared");
        Ok(HistoryCleared { removed })
    }

    async fn reconvert(
        &self,
        index: usize,
        formats: &[FormatKey],
        format: OutputFormat,
    ) -> Result<ConversionReport> {
        let url = self
            .history_store()
            .get(index)
            .map(|entry| entry.url.clone())
            .ok_or(AppError::MissingEntry(index))?;
        self.convert(&url, formats, None, format).await
    }

    fn theme(&self, command: &ThemeCommands) -> Result<ThemeReport> {
        let theme = match command {
            ThemeCommands::Show => load_theme(&self.store),
            ThemeCommands::Set(args) => {
                save_theme(&self.store, args.theme)?;
                args.theme
            }
            ThemeCommands::Toggle => toggle_theme(&self.store)?,
        };
        Ok(ThemeReport { theme })
    }

    async fn health(&self) -> Result<HealthReport> {
        match &self.backend {
            Backend::Http(client) => Ok(client.health().await?),
            Backend::Simulated(_) => Ok(HealthReport {
                status: "healthy".to_string(),
                message: Some("simulated backend".to_string()),
                active_tasks: None,
            }),
        }
    }

    async fn download(&self, args: &DownloadArgs) -> Result<DownloadReport> {
        let client = self.backend.http("downloading files")?;
        let history = self.history_store();
        let entry = history
            .get(args.index)
            .ok_or(AppError::MissingEntry(args.index))?;
        let items: Vec<DownloadItem> = normalize_files(&entry.files, client)
            .into_iter()
            .filter(|item| {
                args.formats.is_empty()
                    || args.formats.iter().any(|f| f.as_str() == item.format)
            })
            .collect();
        if items.is_empty() {
            warn!(index = args.index, "no matching files to download");
        }

        tokio::fs::create_dir_all(&args.dir).await?;
        let mut saved = Vec::with_capacity(items.len());
        for item in &items {
            let path = client.download(item, &args.dir).await?;
            info!(format = %item.format, path = %path.display(), "file saved");
            saved.push(path);
        }
        Ok(DownloadReport { saved })
    }
}

fn print_progress(event: &ConversionEvent) {
    match event {
        ConversionEvent::Metadata { metadata } => {
            eprintln!("{} ({})", metadata.title, metadata.duration_display);
        }
        ConversionEvent::TaskStarted { task_id } => eprintln!("task {task_id} started"),
        ConversionEvent::Progress {
            progress, phase, ..
        } => eprintln!("[{progress:>3}%] {}", phase.label()),
        ConversionEvent::Notice { message, .. } => eprintln!("{message}"),
        _ => {}
    }
}

#[derive(Debug, Serialize)]
pub struct ConversionReport {
    pub task_id: String,
    pub url: String,
    pub title: String,
    pub duration: String,
    pub placeholder_metadata: bool,
    pub downloads: Vec<DownloadItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub saved: Vec<PathBuf>,
}

impl DisplayFallback for ConversionReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} [{}] task={}", self.title, self.duration, self.task_id)];
        for item in &self.downloads {
            lines.push(format!(
                "  {} | {} | {} | {}",
                item.label, item.human_size, item.filename, item.url
            ));
        }
        for path in &self.saved {
            lines.push(format!("saved {}", path.display()));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub url: String,
    pub status: InputStatus,
    pub video_id: Option<String>,
}

impl DisplayFallback for ValidationReport {
    fn display(&self) -> String {
        match (self.status, &self.video_id) {
            (InputStatus::Empty, _) => "empty input".to_string(),
            (InputStatus::Invalid, _) => format!("invalid: {}", self.url),
            (InputStatus::Valid, Some(id)) => format!("valid: {} (id {id})", self.url),
            (InputStatus::Valid, None) => format!("valid: {} (no video id)", self.url),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryList {
    pub total: usize,
    pub rows: Vec<HistoryRow>,
}

#[derive(Debug, Serialize)]
pub struct HistoryRow {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub formats: Vec<String>,
}

impl DisplayFallback for HistoryList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "history is empty".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            lines.push(format!(
                "[{}] {} | {} | {} | {}",
                row.index,
                row.timestamp.format("%Y-%m-%d %H:%M"),
                row.title,
                row.url,
                row.formats.join(",")
            ));
        }
        if self.total > self.rows.len() {
            lines.push(format!("... {} more", self.total - self.rows.len()));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryCleared {
    pub removed: usize,
}

impl DisplayFallback for HistoryCleared {
    fn display(&self) -> String {
        format!("removed {} history entries", self.removed)
    }
}

#[derive(Debug, Serialize)]
pub struct ThemeReport {
    pub theme: Theme,
}

impl DisplayFallback for ThemeReport {
    fn display(&self) -> String {
        self.theme.to_string()
    }
}

impl DisplayFallback for HealthReport {
    fn display(&self) -> String {
        let mut line = format!("status: {}", self.status);
        if let Some(message) = &self.message {
            line.push_str(&format!(" ({message})"));
        }
        if let Some(active) = self.active_tasks {
            line.push_str(&format!(", active tasks: {active}"));
        }
        line
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
}

impl DisplayFallback for DownloadReport {
    fn display(&self) -> String {
        if self.saved.is_empty() {
            return "nothing downloaded".to_string();
        }
        self.saved
            .iter()
            .map(|path| format!("saved {}", path.display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
