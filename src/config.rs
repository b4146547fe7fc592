//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while turning configuration values into watcher settings.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive number of seconds, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("timeout ({timeout}s) must be greater than or equal to poll interval ({poll_interval}s)")]
    TimeoutBelowPollInterval { timeout: f64, poll_interval: f64 },
    #[error("{name} must be at most 31536000 seconds (one year), got {value}")]
    OutOfRange { name: &'static str, value: f64 },
}

/// Largest accepted timeout or poll interval (one year).
pub const MAX_SETTING_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Validated timing of the presence tracker.
///
/// `timeout >= poll_interval` always holds, so two consecutive steady-state
/// heartbeats are never further apart than the pulse time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    timeout: Duration,
    poll_interval: Duration,
}

impl Settings {
    pub fn new(timeout_seconds: f64, poll_interval_seconds: f64) -> Result<Self, ConfigError> {
        check_positive("timeout", timeout_seconds)?;
        check_positive("poll interval", poll_interval_seconds)?;
        if timeout_seconds < poll_interval_seconds {
            return Err(ConfigError::TimeoutBelowPollInterval {
                timeout: timeout_seconds,
                poll_interval: poll_interval_seconds,
            });
        }

        Ok(Self {
            timeout: to_duration("timeout", timeout_seconds)?,
            poll_interval: to_duration("poll interval", poll_interval_seconds)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Largest gap, in seconds, across which the store merges same-status heartbeats.
    pub fn pulsetime(&self) -> f64 {
        (self.timeout + self.poll_interval).as_secs_f64()
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn to_duration(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if value > MAX_SETTING_SECONDS {
        return Err(ConfigError::OutOfRange { name, value });
    }
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::OutOfRange { name, value })
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Used instead of `watcher` when running with `--testing`.
    #[serde(default = "default_testing_watcher")]
    pub watcher_testing: WatcherConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Presence tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds without input before the user counts as AFK.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Seconds between two idle-time samples.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: f64,
    /// Name reported to the server when creating the bucket.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Bucket name override (defaults to the client name).
    #[serde(default)]
    pub bucket: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            poll_interval_seconds: default_poll_interval_seconds(),
            client_name: default_client_name(),
            bucket: None,
        }
    }
}

impl WatcherConfig {
    pub fn bucket_name(&self) -> String {
        match &self.bucket {
            Some(b) if !b.is_empty() => b.clone(),
            _ => self.client_name.clone(),
        }
    }
}

/// Event server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Port used with `--testing`.
    #[serde(default = "default_testing_port")]
    pub testing_port: u16,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            testing_port: default_testing_port(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Data directory for the heartbeat spool.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Returns the directory holding queued heartbeats.
    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

// Default value functions
fn default_timeout_seconds() -> f64 {
    180.0
}

fn default_poll_interval_seconds() -> f64 {
    5.0
}

fn default_testing_watcher() -> WatcherConfig {
    WatcherConfig {
        timeout_seconds: 20.0,
        poll_interval_seconds: 1.0,
        ..WatcherConfig::default()
    }
}

fn default_client_name() -> String {
    "afk-watcher".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5600
}

fn default_testing_port() -> u16 {
    5666
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".afk-watcher"))
        .unwrap_or_else(|| PathBuf::from(".afk-watcher"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watcher: WatcherConfig::default(),
            watcher_testing: default_testing_watcher(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            let default_paths = [
                PathBuf::from("config/default.toml"),
                dirs::config_dir()
                    .map(|d| d.join("afk-watcher/config.toml"))
                    .unwrap_or_default(),
            ];

            let mut loaded = None;
            for path in &default_paths {
                if path.is_file() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.logging.data_dir = expand_tilde(&config.logging.data_dir);

        Ok(config)
    }

    /// Apply `AFK_WATCHER_*` overrides read through `lookup`.
    ///
    /// Timing overrides apply to both the normal and the testing section.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AFK_WATCHER_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.watcher.timeout_seconds = v;
            self.watcher_testing.timeout_seconds = v;
        }
        if let Some(v) = lookup("AFK_WATCHER_POLL_INTERVAL").and_then(|v| v.parse().ok()) {
            self.watcher.poll_interval_seconds = v;
            self.watcher_testing.poll_interval_seconds = v;
        }
        if let Some(v) = lookup("AFK_WATCHER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("AFK_WATCHER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = lookup("AFK_WATCHER_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("AFK_WATCHER_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Validate configuration values that are not covered by [`Settings`].
    pub fn validate(&self) -> Result<()> {
        for watcher in [&self.watcher, &self.watcher_testing] {
            if watcher.client_name.is_empty() {
                anyhow::bail!("Client name cannot be empty");
            }
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }
        if self.server.port == 0 || self.server.testing_port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }
        if self.server.request_timeout_seconds == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }
        Ok(())
    }

    /// Watcher section for the selected mode.
    pub fn watcher(&self, testing: bool) -> &WatcherConfig {
        if testing {
            &self.watcher_testing
        } else {
            &self.watcher
        }
    }

    /// Build tracker settings, letting command-line values win over the file.
    pub fn settings(
        &self,
        testing: bool,
        timeout: Option<f64>,
        poll_interval: Option<f64>,
    ) -> Result<Settings, ConfigError> {
        let watcher = self.watcher(testing);
        Settings::new(
            timeout.unwrap_or(watcher.timeout_seconds),
            poll_interval.unwrap_or(watcher.poll_interval_seconds),
        )
    }

    /// Base URL of the event server.
    pub fn server_url(&self, testing: bool, host: Option<&str>, port: Option<u16>) -> String {
        let host = host.unwrap_or(&self.server.host);
        let default_port = if testing {
            self.server.testing_port
        } else {
            self.server.port
        };
        format!("http://{}:{}", host, port.unwrap_or(default_port))
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(home) = dirs::home_dir() {
            if path_str == "~" {
                return home;
            }
            if let Some(rest) = path_str.strip_prefix("~/") {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn settings_accept_timeout_equal_to_poll_interval() {
        let settings = assert_ok!(Settings::new(5.0, 5.0));
        assert_eq!(settings.timeout(), Duration::from_secs(5));
        assert_eq!(settings.pulsetime(), 10.0);
    }

    #[test]
    fn settings_reject_timeout_below_poll_interval() {
        let err = assert_err!(Settings::new(4.0, 5.0));
        assert_eq!(
            err,
            ConfigError::TimeoutBelowPollInterval {
                timeout: 4.0,
                poll_interval: 5.0
            }
        );
    }

    #[test]
    fn settings_reject_non_positive_values() {
        assert!(matches!(
            Settings::new(0.0, 0.0),
            Err(ConfigError::NotPositive { name: "timeout", .. })
        ));
        assert!(matches!(
            Settings::new(60.0, -1.0),
            Err(ConfigError::NotPositive { name: "poll interval", .. })
        ));
        assert!(Settings::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn settings_reject_values_beyond_a_year() {
        let err = assert_err!(Settings::new(1e20, 5.0));
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                name: "timeout",
                value: 1e20
            }
        );
        assert!(matches!(
            Settings::new(1e13, 5.0),
            Err(ConfigError::OutOfRange { name: "timeout", .. })
        ));
        assert_ok!(Settings::new(MAX_SETTING_SECONDS, 5.0));
    }

    #[test]
    fn pulsetime_is_timeout_plus_poll_interval() {
        let settings = Settings::new(60.0, 5.0).unwrap();
        assert_eq!(settings.pulsetime(), 65.0);
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn defaults_match_watcher_conventions() {
        let config = Config::default();
        assert_eq!(config.watcher.timeout_seconds, 180.0);
        assert_eq!(config.watcher.poll_interval_seconds, 5.0);
        assert_eq!(config.watcher_testing.timeout_seconds, 20.0);
        assert_eq!(config.watcher_testing.poll_interval_seconds, 1.0);
        assert_eq!(config.watcher.bucket_name(), "afk-watcher");
        assert_ok!(config.validate());
    }

    #[test]
    fn parses_partial_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[watcher]
timeout_seconds = 60
bucket = "afk_laptop"

[server]
port = 5700

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.watcher.timeout_seconds, 60.0);
        assert_eq!(config.watcher.poll_interval_seconds, 5.0);
        assert_eq!(config.watcher.bucket_name(), "afk_laptop");
        assert_eq!(config.server.port, 5700);
        assert_eq!(config.server.testing_port, 5666);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.watcher_testing.timeout_seconds, 20.0);
    }

    #[test]
    fn load_reports_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[watcher\ntimeout_seconds = ").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn env_overrides_apply_to_both_sections() {
        let vars: HashMap<&str, &str> = [
            ("AFK_WATCHER_TIMEOUT", "90"),
            ("AFK_WATCHER_POLL_INTERVAL", "2.5"),
            ("AFK_WATCHER_PORT", "not-a-port"),
            ("AFK_WATCHER_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.watcher.timeout_seconds, 90.0);
        assert_eq!(config.watcher_testing.poll_interval_seconds, 2.5);
        assert_eq!(config.server.port, 5600);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn command_line_values_win() {
        let config = Config::default();
        let settings = config.settings(false, Some(30.0), None).unwrap();
        assert_eq!(settings.timeout(), Duration::from_secs(30));
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));

        assert!(config.settings(true, None, Some(30.0)).is_err());
    }

    #[test]
    fn server_url_uses_testing_port() {
        let config = Config::default();
        assert_eq!(config.server_url(false, None, None), "http://127.0.0.1:5600");
        assert_eq!(config.server_url(true, None, None), "http://127.0.0.1:5666");
        assert_eq!(
            config.server_url(true, Some("10.0.0.2"), Some(8080)),
            "http://10.0.0.2:8080"
        );
    }

    #[test]
    fn validate_rejects_empty_client_name() {
        let mut config = Config::default();
        config.watcher.client_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/data")), home.join("data"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
