//! SpeedTestRunner - single-flight execution of one speed test
//!
//! Every invocation persists exactly one [`SpeedTestRecord`]: a measurement,
//! a failed measurement, or a skip sentinel. Only storage errors escape.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::runtime::{RunPermit, RuntimeState};
use super::{MeasureRequest, Measurement, OFFLINE_SKIPPED, ThroughputProbe, URL_NOT_SET};
use crate::clock::Clock;
use crate::config::Config;
use crate::settings::{MAX_SPEEDTEST_DURATION, SpeedTestMode, SpeedTestSettings};
use crate::storage::{SpeedTestRecord, StorageBackend, StorageResult};

/// Outcome of a run-now request
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RunNowResponse {
    /// A new run was started by this request
    pub started: bool,
    /// A run is in flight (the new one, or the one that declined this request)
    pub running: bool,
}

#[derive(Clone)]
pub struct SpeedTestRunner {
    store: Arc<dyn StorageBackend>,
    config: Arc<Config>,
    runtime: RuntimeState,
    clock: Arc<dyn Clock>,
    direct: Arc<dyn ThroughputProbe>,
    speedtest_net: Arc<dyn ThroughputProbe>,
}

impl SpeedTestRunner {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        config: Arc<Config>,
        runtime: RuntimeState,
        clock: Arc<dyn Clock>,
        direct: Arc<dyn ThroughputProbe>,
        speedtest_net: Arc<dyn ThroughputProbe>,
    ) -> Self {
        Self {
            store,
            config,
            runtime,
            clock,
            direct,
            speedtest_net,
        }
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Wait for any run in flight, then run
    pub async fn run_once(&self) -> StorageResult<SpeedTestRecord> {
        let permit = self.runtime.acquire(self.clock.now()).await;
        self.run_with_permit(permit).await
    }

    /// Start a run in the background unless one is already in flight
    pub fn run_now(&self) -> RunNowResponse {
        let Some(permit) = self.runtime.try_acquire(self.clock.now()) else {
            info!("speed test already running, declining run-now request");
            return RunNowResponse {
                started: false,
                running: true,
            };
        };

        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run_with_permit(permit).await {
                warn!("on-demand speed test could not be stored: {e}");
            }
        });

        RunNowResponse {
            started: true,
            running: true,
        }
    }

    /// Run while holding `permit`; the permit is released on return
    #[instrument(skip_all)]
    pub async fn run_with_permit(&self, permit: RunPermit) -> StorageResult<SpeedTestRecord> {
        let settings = SpeedTestSettings::load(self.store.as_ref(), &self.config).await?;
        let started_at = permit.started_at().unwrap_or_else(|| self.clock.now());

        let mut record = match self.skip_reason(&settings).await? {
            Some(reason) => SpeedTestRecord::skipped(started_at, settings.mode, reason),
            None => self.measure(&settings).await.into_record(started_at, settings.mode),
        };

        let id = self.store.record_speed_test(&record).await?;
        record.id = Some(id);

        match &record.error {
            None => info!(
                "speed test {id} ({}) finished: {:.2} Mbps down, upload {:?}, ping {:?}",
                record.speedtest_mode, record.mbps, record.upload_mbps, record.ping_ms
            ),
            Some(error) => info!("speed test {id} ({}) recorded with error: {error}", record.speedtest_mode),
        }

        drop(permit);
        Ok(record)
    }

    /// Sentinel error for a run that must not transfer anything
    async fn skip_reason(&self, settings: &SpeedTestSettings) -> StorageResult<Option<&'static str>> {
        if settings.skip_if_offline {
            let open = self.store.get_open_period().await?;
            if open.is_some_and(|period| !period.is_up) {
                return Ok(Some(OFFLINE_SKIPPED));
            }
        }
        if settings.mode == SpeedTestMode::Url && settings.url.is_none() {
            return Ok(Some(URL_NOT_SET));
        }
        Ok(None)
    }

    async fn measure(&self, settings: &SpeedTestSettings) -> Measurement {
        let request = MeasureRequest {
            mode: settings.mode,
            url: settings.url.clone(),
            upload_url: settings.upload_url.clone(),
            duration: Duration::try_from_secs_f64(settings.duration_seconds)
                .unwrap_or(Duration::from_secs(MAX_SPEEDTEST_DURATION as u64)),
        };

        match settings.mode {
            SpeedTestMode::Url => self.direct.measure(&request).await,
            SpeedTestMode::SpeedtestNet | SpeedTestMode::SpeedtestPl => {
                self.speedtest_net.measure(&request).await
            }
        }
    }
}
