use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Host names treated as a local development backend.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]", "0.0.0.0"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConverterConfig {
    pub api: ApiSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub debounce: DebounceSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ConverterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "polling.interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.storage.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.history_limit",
                reason: "must be greater than zero".into(),
            });
        }
        for (field, value) in [
            ("api.local_base_url", &self.api.local_base_url),
            ("api.deployed_base_url", &self.api.deployed_base_url),
        ] {
            url::Url::parse(value).map_err(|err| ConfigError::Invalid {
                field,
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    pub local_base_url: String,
    pub deployed_base_url: String,
    /// Host name the client runs on; decides between the local and deployed backend.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_url_override: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ApiSection {
    /// The one place the backend address is chosen.
    pub fn base_url(&self) -> &str {
        match self.base_url_override.as_deref() {
            Some(base) => base,
            None => self.base_url_for_host(&self.host),
        }
    }

    pub fn base_url_for_host(&self, host: &str) -> &str {
        if is_loopback_host(host) {
            &self.local_base_url
        } else {
            &self.deployed_base_url
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    LOOPBACK_HOSTS.contains(&host.as_str())
}

/// What to do when the metadata request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataPolicy {
    /// Continue with a placeholder record flagged as such.
    #[default]
    Placeholder,
    /// Fail the conversion.
    Propagate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    #[serde(default)]
    pub metadata_policy: MetadataPolicy,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            metadata_policy: MetadataPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebounceSection {
    #[serde(default = "default_paste_ms")]
    pub paste_ms: u64,
    #[serde(default = "default_input_ms")]
    pub input_ms: u64,
    #[serde(default = "default_redownload_ms")]
    pub redownload_ms: u64,
}

impl Default for DebounceSection {
    fn default() -> Self {
        Self {
            paste_ms: default_paste_ms(),
            input_ms: default_input_ms(),
            redownload_ms: default_redownload_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub data_dir: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            step_delay_ms: default_step_delay(),
            jitter_ms: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_paste_ms() -> u64 {
    500
}

fn default_input_ms() -> u64 {
    800
}

fn default_redownload_ms() -> u64 {
    1000
}

fn default_history_limit() -> usize {
    50
}

fn default_step_delay() -> u64 {
    800
}

fn default_jitter() -> u64 {
    400
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_converter_config<P: AsRef<Path>>(path: P) -> Result<ConverterConfig> {
    let config: ConverterConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> ApiSection {
        ApiSection {
            local_base_url: "http://localhost:5000/api".into(),
            deployed_base_url: "https://yt2mp3.example.com/api".into(),
            host: "localhost".into(),
            base_url_override: None,
            request_timeout_seconds: 60,
        }
    }

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/yt2mp3.toml");
        let config = load_converter_config(path).expect("config should parse");
        assert_eq!(config.polling.interval_ms, 2000);
        assert_eq!(config.storage.history_limit, 50);
        assert_eq!(config.polling.metadata_policy, MetadataPolicy::Placeholder);
        assert_eq!(config.debounce.paste_ms, 500);
        assert_eq!(config.api.base_url(), "http://localhost:5000/api");
    }

    #[test]
    fn loopback_hosts_select_local_backend() {
        let api = api();
        assert_eq!(api.base_url_for_host("localhost"), api.local_base_url);
        assert_eq!(api.base_url_for_host("127.0.0.1"), api.local_base_url);
        assert_eq!(api.base_url_for_host("yt2mp3.example.com"), api.deployed_base_url);
    }

    #[test]
    fn override_wins_over_host_rule() {
        let mut api = api();
        api.base_url_override = Some("http://127.0.0.1:9999/api".into());
        assert_eq!(api.base_url(), "http://127.0.0.1:9999/api");
    }

    #[test]
    fn optional_sections_take_defaults() {
        let config: ConverterConfig = toml::from_str(
            r#"
            [api]
            local_base_url = "http://localhost:5000/api"
            deployed_base_url = "https://yt2mp3.example.com/api"

            [storage]
            data_dir = "data"
            "#,
        )
        .unwrap();
        assert_eq!(config.polling.interval_ms, 2000);
        assert_eq!(config.debounce.input_ms, 800);
        assert_eq!(config.debounce.redownload_ms, 1000);
        assert!(!config.simulation.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config: ConverterConfig = toml::from_str(
            r#"
            [api]
            local_base_url = "http://localhost:5000/api"
            deployed_base_url = "https://yt2mp3.example.com/api"

            [storage]
            data_dir = "data"
            "#,
        )
        .unwrap();
        config.polling.interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "polling.interval_ms", .. })
        ));
    }
}
