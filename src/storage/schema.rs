//! Row types persisted by the storage backends
//!
//! ## Timestamps
//!
//! All timestamps are UTC in memory. The SQLite backend stores them as
//! Unix milliseconds so range scans stay integer comparisons.
//!
//! ## Records
//!
//! - [`ConnectivityPeriod`] - derived aggregate, one row per contiguous up/down span
//! - [`ConnectivityCheck`] - raw sample, append-only
//! - [`SpeedTestRecord`] - one row per speed test invocation, failed or not
//! - [`Setting`] - live-reconfigurable key/value overrides

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A maximal contiguous span of one reachability state
///
/// At most one period is open (`ended_at == None`) at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityPeriod {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_up: bool,
}

impl ConnectivityPeriod {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Overlap test used by range queries: starts before `end` and is
    /// still open or ends after `start`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.started_at < end && self.ended_at.is_none_or(|ended| ended > start)
    }
}

/// One point-in-time reachability sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityCheck {
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    pub latency_ms: Option<f64>,
}

/// Result of one speed test invocation
///
/// Failures are encoded through `error` with zeroed numeric fields,
/// never by leaving the row out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestRecord {
    /// Row id, `None` until persisted
    pub id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub bytes_downloaded: u64,
    pub mbps: f64,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub server_name: Option<String>,
    pub server_country: Option<String>,
    pub speedtest_mode: String,
    pub error: Option<String>,
}

impl SpeedTestRecord {
    /// A zero-valued record carrying only an error sentinel
    pub fn skipped(
        started_at: DateTime<Utc>,
        speedtest_mode: impl ToString,
        error: impl ToString,
    ) -> Self {
        Self {
            id: None,
            started_at,
            duration_seconds: 0.0,
            bytes_downloaded: 0,
            mbps: 0.0,
            upload_mbps: None,
            ping_ms: None,
            server_name: None,
            server_country: None,
            speedtest_mode: speedtest_mode.to_string(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A stored setting overriding a compiled-in default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}
