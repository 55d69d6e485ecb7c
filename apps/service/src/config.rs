use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::environments::Environment;
use crate::error::ConfigError;
use crate::feeds::{FeedKind, FeedSettings};
use crate::monitoring::types::CheckKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds allowed between publish and confirmed availability.
    #[serde(default = "default_threshold")]
    pub threshold_seconds: u64,
    /// Newline-delimited JSON event file, stdin when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<path::PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub retries: u32,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    pub poll_interval_seconds: u64,
    /// Cache expiry, twice the threshold when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_seconds: Option<u64>,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

/// One endpoint family to verify for every matching publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub alias: String,
    pub kind: CheckKind,
    /// Path appended to the environment URL. Content is polled at `endpoint + uuid`.
    pub endpoint: String,
    pub granularity: u32,
    pub content_types: Vec<String>,
    #[serde(default)]
    pub health: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Transport of a notification check's feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedKind>,
}

impl CheckConfig {
    pub fn applies_to(&self, content_type: &str) -> bool {
        self.content_types.iter().any(|candidate| candidate == content_type)
    }

    pub fn feed_kind(&self) -> FeedKind {
        self.feed.unwrap_or_default()
    }
}

fn default_threshold() -> u64 {
    120
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10, retries: 1, user_agent: "publish-monitor/0.1".into() }
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            expiry_seconds: None,
            reconnect_delay_ms: 500,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/publish-monitor/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("publish-monitor/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold_seconds: default_threshold(),
            log: LogConfig::default(),
            http: HttpConfig::default(),
            feeds: FeedsConfig::default(),
            events: None,
            checks: vec![
                CheckConfig {
                    alias: "content".into(),
                    kind: CheckKind::Content,
                    endpoint: "/content/".into(),
                    granularity: 12,
                    content_types: vec!["Article".into()],
                    health: "/__health".into(),
                    api_key: None,
                    feed: None,
                },
                CheckConfig {
                    alias: "notifications".into(),
                    kind: CheckKind::Notifications,
                    endpoint: "/content/notifications".into(),
                    granularity: 12,
                    content_types: vec!["Article".into()],
                    health: "/__health".into(),
                    api_key: None,
                    feed: Some(FeedKind::Pull),
                },
            ],
            environments: Vec::new(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;
        write_1(f, "SLA Threshold (s)", &self.threshold_seconds)?;
        write_title_1(f, "Feeds")?;
        write_1(f, "Poll Interval (s)", &self.feeds.poll_interval_seconds)?;
        write_1(f, "Expiry (s)", &self.feed_expiry().as_secs())?;
        write_title_1(f, "Checks")?;
        for check in &self.checks {
            write_1(f, &check.alias, &check.kind)?;
            write_2(f, "Endpoint", &check.endpoint)?;
            write_2(f, "Granularity", &check.granularity)?;
            write_2(f, "Content Types", &check.content_types.join(", "))?;
        }
        write_title_1(f, "Environments")?;
        for environment in &self.environments {
            write_1(f, &environment.name, &environment.read_url)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/publish-monitor/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }

    pub fn feed_expiry(&self) -> Duration {
        Duration::from_secs(self.feeds.expiry_seconds.unwrap_or(self.threshold_seconds * 2))
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            poll_interval: Duration::from_secs(self.feeds.poll_interval_seconds),
            expiry: self.feed_expiry(),
            reconnect_delay: Duration::from_millis(self.feeds.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.feeds.max_reconnect_delay_ms),
        }
    }
}
