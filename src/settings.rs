//! Live settings: keys, typed fail-soft accessors and effective values
//!
//! Stored settings override compiled defaults from [`Config`]. Every
//! numeric or boolean value that fails to parse silently falls back to its
//! default; reading settings never fails on content, only on storage.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::storage::{StorageBackend, StorageResult};
use crate::util::parse_bool;

pub const CONNECT_TARGET: &str = "connect_target";
pub const CONNECT_INTERVAL_SECONDS: &str = "connect_interval_seconds";
pub const CHECK_BUFFER_SECONDS: &str = "connectivity_check_buffer_seconds";
pub const CHECK_BUFFER_MAX: &str = "connectivity_check_buffer_max";
pub const SPEEDTEST_MODE: &str = "speedtest_mode";
pub const SPEEDTEST_URL: &str = "speedtest_url";
pub const SPEEDTEST_UPLOAD_URL: &str = "speedtest_upload_url";
pub const SPEEDTEST_INTERVAL_SECONDS: &str = "speedtest_interval_seconds";
pub const SPEEDTEST_DURATION_SECONDS: &str = "speedtest_duration_seconds";
pub const SPEEDTEST_SKIP_IF_OFFLINE: &str = "speedtest_skip_if_offline";

pub const MIN_CONNECT_INTERVAL: f64 = 0.1;
pub const MIN_SPEEDTEST_INTERVAL: f64 = 1.0;
pub const MIN_SPEEDTEST_DURATION: f64 = 1.0;

/// Intervals and the buffer age are capped at one day
pub const MAX_INTERVAL_SECONDS: f64 = 86_400.0;
pub const MAX_SPEEDTEST_DURATION: f64 = 3_600.0;

const CONNECTIVITY_KEYS: [&str; 4] = [
    CONNECT_TARGET,
    CONNECT_INTERVAL_SECONDS,
    CHECK_BUFFER_SECONDS,
    CHECK_BUFFER_MAX,
];

const SPEEDTEST_KEYS: [&str; 6] = [
    SPEEDTEST_MODE,
    SPEEDTEST_URL,
    SPEEDTEST_UPLOAD_URL,
    SPEEDTEST_INTERVAL_SECONDS,
    SPEEDTEST_DURATION_SECONDS,
    SPEEDTEST_SKIP_IF_OFFLINE,
];

/// Measurement strategy for speed tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedTestMode {
    /// Direct download from a configured URL
    #[default]
    Url,
    /// Best speedtest.net server
    SpeedtestNet,
    /// Best speedtest.net server located in Poland
    SpeedtestPl,
}

impl SpeedTestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedTestMode::Url => "url",
            SpeedTestMode::SpeedtestNet => "speedtest.net",
            SpeedTestMode::SpeedtestPl => "speedtest.pl",
        }
    }

    /// Parse a stored value, treating anything unknown as `url`
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl fmt::Display for SpeedTestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpeedTestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "url" => Ok(SpeedTestMode::Url),
            "speedtest.net" => Ok(SpeedTestMode::SpeedtestNet),
            "speedtest.pl" => Ok(SpeedTestMode::SpeedtestPl),
            other => Err(format!(
                "speedtest_mode must be one of: url, speedtest.net, speedtest.pl (got {other:?})"
            )),
        }
    }
}

fn float_or(values: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    values
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn int_or(values: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    values
        .get(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn bool_or(values: &HashMap<String, String>, key: &str, default: bool) -> bool {
    values
        .get(key)
        .and_then(|v| parse_bool(v))
        .unwrap_or(default)
}

/// Non-empty stored string, else the default
fn string_or(values: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    values
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .or(default.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

/// Effective settings for one connectivity tick
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivitySettings {
    pub target: String,
    pub interval_seconds: f64,
    pub buffer_seconds: f64,
    pub buffer_max: usize,
}

impl ConnectivitySettings {
    pub fn resolve(values: &HashMap<String, String>, config: &Config) -> Self {
        let defaults = &config.connectivity;

        let target = values
            .get(CONNECT_TARGET)
            .cloned()
            .unwrap_or_else(|| defaults.target.clone());

        Self {
            target,
            interval_seconds: float_or(values, CONNECT_INTERVAL_SECONDS, defaults.interval_seconds)
                .clamp(MIN_CONNECT_INTERVAL, MAX_INTERVAL_SECONDS),
            buffer_seconds: float_or(values, CHECK_BUFFER_SECONDS, defaults.buffer_seconds)
                .clamp(0.0, MAX_INTERVAL_SECONDS),
            buffer_max: int_or(values, CHECK_BUFFER_MAX, defaults.buffer_max).max(1) as usize,
        }
    }

    #[instrument(skip_all)]
    pub async fn load(store: &dyn StorageBackend, config: &Config) -> StorageResult<Self> {
        let values = store.get_settings(&CONNECTIVITY_KEYS).await?;
        Ok(Self::resolve(&values, config))
    }
}

/// Effective settings for one speed test run
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTestSettings {
    pub mode: SpeedTestMode,
    pub url: Option<String>,
    pub upload_url: Option<String>,
    pub interval_seconds: f64,
    pub duration_seconds: f64,
    pub skip_if_offline: bool,
}

impl SpeedTestSettings {
    pub fn resolve(values: &HashMap<String, String>, config: &Config) -> Self {
        let defaults = &config.speedtest;

        let mode = values
            .get(SPEEDTEST_MODE)
            .map(|v| SpeedTestMode::parse_lenient(v))
            .unwrap_or_else(|| SpeedTestMode::parse_lenient(&defaults.mode));

        Self {
            mode,
            url: string_or(values, SPEEDTEST_URL, defaults.url.as_deref()),
            upload_url: string_or(values, SPEEDTEST_UPLOAD_URL, defaults.upload_url.as_deref()),
            interval_seconds: float_or(values, SPEEDTEST_INTERVAL_SECONDS, defaults.interval_seconds)
                .clamp(MIN_SPEEDTEST_INTERVAL, MAX_INTERVAL_SECONDS),
            duration_seconds: float_or(values, SPEEDTEST_DURATION_SECONDS, defaults.duration_seconds)
                .clamp(MIN_SPEEDTEST_DURATION, MAX_SPEEDTEST_DURATION),
            skip_if_offline: bool_or(values, SPEEDTEST_SKIP_IF_OFFLINE, defaults.skip_if_offline),
        }
    }

    #[instrument(skip_all)]
    pub async fn load(store: &dyn StorageBackend, config: &Config) -> StorageResult<Self> {
        let values = store.get_settings(&SPEEDTEST_KEYS).await?;
        Ok(Self::resolve(&values, config))
    }
}

/// Seed every live key that has no stored value with its effective default
///
/// Returns the keys that were inserted.
#[instrument(skip_all)]
pub async fn seed_defaults(
    store: &dyn StorageBackend,
    config: &Config,
    at: DateTime<Utc>,
) -> StorageResult<Vec<&'static str>> {
    let connectivity = &config.connectivity;
    let speedtest = &config.speedtest;

    let defaults: [(&'static str, String); 10] = [
        (CONNECT_TARGET, connectivity.target.clone()),
        (CONNECT_INTERVAL_SECONDS, connectivity.interval_seconds.to_string()),
        (CHECK_BUFFER_SECONDS, connectivity.buffer_seconds.to_string()),
        (CHECK_BUFFER_MAX, connectivity.buffer_max.to_string()),
        (
            SPEEDTEST_MODE,
            SpeedTestMode::parse_lenient(&speedtest.mode).to_string(),
        ),
        (SPEEDTEST_URL, speedtest.url.clone().unwrap_or_default()),
        (
            SPEEDTEST_UPLOAD_URL,
            speedtest.upload_url.clone().unwrap_or_default(),
        ),
        (SPEEDTEST_INTERVAL_SECONDS, speedtest.interval_seconds.to_string()),
        (SPEEDTEST_DURATION_SECONDS, speedtest.duration_seconds.to_string()),
        (SPEEDTEST_SKIP_IF_OFFLINE, speedtest.skip_if_offline.to_string()),
    ];

    let mut inserted = Vec::new();
    for (key, value) in defaults {
        if store.ensure_default_setting(key, &value, at).await? {
            debug!("seeded setting {key}={value:?}");
            inserted.push(key);
        }
    }
    Ok(inserted)
}
