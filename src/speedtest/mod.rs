//! Speed testing: measurement strategies, the single-flight runner and its scheduler
//!
//! ## Strategies
//!
//! - [`direct::UrlStrategy`] - streams a direct HTTP(S) download, optionally an upload,
//!   or a timed FTP download via [`ftp`]
//! - [`ookla::OoklaStrategy`] - picks the lowest-latency speedtest.net server
//!   (optionally restricted to Poland) and measures download, upload and ping
//!
//! Strategies never fail: every problem ends up in [`Measurement::error`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::settings::SpeedTestMode;
use crate::storage::SpeedTestRecord;

pub mod direct;
pub mod ftp;
pub mod ookla;
pub mod runner;
pub mod runtime;
pub mod scheduler;

pub use direct::UrlStrategy;
pub use ookla::OoklaStrategy;
pub use runner::SpeedTestRunner;
pub use runtime::{RunPermit, RuntimeSnapshot, RuntimeState};
pub use scheduler::SpeedTestScheduler;

pub const OFFLINE_SKIPPED: &str = "offline (skipped)";
pub const URL_NOT_SET: &str = "speedtest_url not set (skipped)";

/// Megabits per second for `bytes` transferred in `seconds`
pub fn mbps(bytes: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / seconds / 1_000_000.0
}

/// Transfer timeout from a configured number of seconds, 10s if unusable
pub fn transfer_timeout(seconds: f64) -> Duration {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if !timeout.is_zero() => timeout,
        _ => Duration::from_secs(10),
    }
}

/// Elapsed time as reported in records, never zero
pub fn elapsed_seconds(started: std::time::Instant) -> f64 {
    started.elapsed().as_secs_f64().max(0.001)
}

/// What a strategy needs to know for one run
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRequest {
    pub mode: SpeedTestMode,
    pub url: Option<String>,
    pub upload_url: Option<String>,
    pub duration: Duration,
}

/// Outcome of one measurement, successful or not
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub duration_seconds: f64,
    pub bytes_downloaded: u64,
    pub mbps: f64,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub server_name: Option<String>,
    pub server_country: Option<String>,
    pub error: Option<String>,
}

impl Measurement {
    /// Failure before any transfer happened
    pub fn failed(error: impl ToString, duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn into_record(self, started_at: DateTime<Utc>, mode: SpeedTestMode) -> SpeedTestRecord {
        SpeedTestRecord {
            id: None,
            started_at,
            duration_seconds: self.duration_seconds,
            bytes_downloaded: self.bytes_downloaded,
            mbps: self.mbps,
            upload_mbps: self.upload_mbps,
            ping_ms: self.ping_ms,
            server_name: self.server_name,
            server_country: self.server_country,
            speedtest_mode: mode.to_string(),
            error: self.error,
        }
    }
}

/// A way of measuring throughput
#[async_trait]
pub trait ThroughputProbe: Send + Sync {
    async fn measure(&self, request: &MeasureRequest) -> Measurement;
}
