use std::path::PathBuf;

use anyhow::Context;
use tracing::trace;

use crate::util;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "crate::util::get_db_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: util::get_db_path(),
        }
    }
}

/// Reachability sampling defaults
///
/// `target`, `interval_seconds`, `buffer_seconds` and `buffer_max` are only
/// compiled defaults; stored settings override them at runtime.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "crate::util::get_connect_target")]
    pub target: String,
    #[serde(default = "crate::util::get_connect_default_port")]
    pub default_port: u16,
    #[serde(default = "crate::util::get_connect_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "crate::util::get_connect_interval_seconds")]
    pub interval_seconds: f64,
    #[serde(default = "crate::util::get_buffer_seconds")]
    pub buffer_seconds: f64,
    #[serde(default = "crate::util::get_buffer_max")]
    pub buffer_max: i64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            target: util::get_connect_target(),
            default_port: util::get_connect_default_port(),
            timeout_seconds: util::get_connect_timeout_seconds(),
            interval_seconds: util::get_connect_interval_seconds(),
            buffer_seconds: util::get_buffer_seconds(),
            buffer_max: util::get_buffer_max(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SpeedTestConfig {
    #[serde(default = "crate::util::get_speedtest_mode")]
    pub mode: String,
    #[serde(default = "crate::util::get_speedtest_url")]
    pub url: Option<String>,
    #[serde(default = "crate::util::get_speedtest_upload_url")]
    pub upload_url: Option<String>,
    #[serde(default = "crate::util::get_speedtest_duration_seconds")]
    pub duration_seconds: f64,
    #[serde(default = "crate::util::get_speedtest_interval_seconds")]
    pub interval_seconds: f64,
    /// Per-request timeout for every transfer
    #[serde(default = "crate::util::get_speedtest_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "crate::util::get_speedtest_skip_if_offline")]
    pub skip_if_offline: bool,
    /// JSON server list used by the speedtest.net strategies
    #[serde(default = "crate::util::get_speedtest_servers_url")]
    pub servers_url: String,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            mode: util::get_speedtest_mode(),
            url: util::get_speedtest_url(),
            upload_url: util::get_speedtest_upload_url(),
            duration_seconds: util::get_speedtest_duration_seconds(),
            interval_seconds: util::get_speedtest_interval_seconds(),
            timeout_seconds: util::get_speedtest_timeout_seconds(),
            skip_if_offline: util::get_speedtest_skip_if_offline(),
            servers_url: util::get_speedtest_servers_url(),
        }
    }
}

/// Where outage notifications are delivered
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifySink {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotifyConfig {
    /// Outages shorter than this are logged but not delivered
    #[serde(default = "crate::util::get_notify_min_outage_seconds")]
    pub min_outage_seconds: f64,
    pub sink: Option<NotifySink>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            min_outage_seconds: util::get_notify_min_outage_seconds(),
            sink: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite under the data dir)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    #[serde(default)]
    pub speedtest: SpeedTestConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .context("invalid configuration file provided")
        .inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content)
}
