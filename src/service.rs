//! LinkWatch - the process-wide context
//!
//! Built once at startup and shared by handle. It owns the store, the
//! speed test runtime state and the collaborators both loops use, and
//! exposes the read-side entry points consumed by outer layers.
//!
//! ## Lifecycle
//!
//! ```text
//! open_store → LinkWatch::new → initialize (health check, seed settings) → run_until(signal)
//!                                                                            ├─ ConnectivityMonitor
//!                                                                            └─ SpeedTestScheduler
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageConfig};
use crate::monitors::{ConnectivityMonitor, ReachabilityProbe, TcpProbe};
use crate::notify::{self, OutageNotifier};
use crate::settings;
use crate::speedtest::runner::RunNowResponse;
use crate::speedtest::{
    OoklaStrategy, RuntimeSnapshot, RuntimeState, SpeedTestRunner, SpeedTestScheduler,
    ThroughputProbe, UrlStrategy,
};
use crate::storage::{
    ConnectivityCheck, ConnectivityPeriod, MemoryBackend, QueryRange, SpeedTestRecord,
    StorageBackend, StorageError, StorageResult,
};

/// Open the configured storage backend
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            warn!("storage backend is 'none', nothing will survive a restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = crate::storage::sqlite::SqliteBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}

pub struct LinkWatch {
    config: Arc<Config>,
    store: Arc<dyn StorageBackend>,
    runtime: RuntimeState,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ReachabilityProbe>,
    direct: Arc<dyn ThroughputProbe>,
    speedtest_net: Arc<dyn ThroughputProbe>,
    notifier: Option<Arc<dyn OutageNotifier>>,
    cancel: CancellationToken,
}

impl LinkWatch {
    /// Context with the production collaborators built from `config`
    pub fn new(config: Config, store: Arc<dyn StorageBackend>) -> anyhow::Result<Self> {
        let probe = TcpProbe::new(
            config.connectivity.default_port,
            config.connectivity.timeout_seconds,
        );
        let direct = UrlStrategy::new(config.speedtest.timeout_seconds)?;
        let speedtest_net = OoklaStrategy::new(
            &config.speedtest.servers_url,
            config.speedtest.timeout_seconds,
        )?;
        let notifier = notify::from_config(&config.notify, &config.connectivity.target)?;

        Ok(Self {
            config: Arc::new(config),
            store,
            runtime: RuntimeState::new(),
            clock: Arc::new(SystemClock),
            probe: Arc::new(probe),
            direct: Arc::new(direct),
            speedtest_net: Arc::new(speedtest_net),
            notifier,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_throughput(
        mut self,
        direct: Arc<dyn ThroughputProbe>,
        speedtest_net: Arc<dyn ThroughputProbe>,
    ) -> Self {
        self.direct = direct;
        self.speedtest_net = speedtest_net;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn OutageNotifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    /// Token cancelled on shutdown; cancel it to stop both loops
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Verify the store and seed missing live settings
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let health = self.store.health_check().await.context("storage health check failed")?;
        if !health.healthy {
            anyhow::bail!("storage backend unhealthy: {}", health.message);
        }
        info!("storage backend healthy: {}", health.message);

        let seeded = settings::seed_defaults(self.store.as_ref(), &self.config, self.clock.now())
            .await
            .context("failed to seed default settings")?;
        if !seeded.is_empty() {
            info!("seeded default settings: {}", seeded.join(", "));
        }
        Ok(())
    }

    pub fn runner(&self) -> SpeedTestRunner {
        SpeedTestRunner::new(
            self.store.clone(),
            self.config.clone(),
            self.runtime.clone(),
            self.clock.clone(),
            self.direct.clone(),
            self.speedtest_net.clone(),
        )
    }

    fn monitor(&self) -> ConnectivityMonitor {
        ConnectivityMonitor::new(
            self.store.clone(),
            self.probe.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
        .with_notifier(self.notifier.clone())
    }

    /// Run both loops until `signal` completes or a loop fails
    ///
    /// On the way out the token is cancelled, both loops are joined (the
    /// connectivity loop flushes its buffer), any in-flight speed test is
    /// awaited and the store is closed. Returns the first loop failure.
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> anyhow::Result<()> {
        let mut tasks: JoinSet<(&'static str, StorageResult<()>)> = JoinSet::new();

        let monitor = self.monitor();
        let cancel = self.cancel.clone();
        tasks.spawn(async move { ("connectivity", monitor.run(cancel).await) });

        let scheduler = SpeedTestScheduler::new(
            self.runner(),
            self.store.clone(),
            self.config.clone(),
            self.clock.clone(),
        );
        let cancel = self.cancel.clone();
        tasks.spawn(async move { ("speedtest", scheduler.run(cancel).await) });

        let mut failure: Option<anyhow::Error> = None;

        tokio::select! {
            _ = signal => info!("shutdown requested"),
            _ = self.cancel.cancelled() => info!("shutdown requested"),
            Some(joined) = tasks.join_next() => {
                failure = Self::loop_failure(joined);
            }
        }

        self.cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = Self::loop_failure(joined) {
                failure.get_or_insert(e);
            }
        }

        // wait for an on-demand run to persist its record
        drop(self.runtime.acquire(self.clock.now()).await);

        self.store.close().await.context("failed to close storage")?;

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn loop_failure(
        joined: Result<(&'static str, StorageResult<()>), tokio::task::JoinError>,
    ) -> Option<anyhow::Error> {
        match joined {
            Ok((_, Ok(()))) => None,
            Ok((name, Err(e))) => {
                error!("{name} loop failed: {e}");
                Some(anyhow::Error::new(e).context(format!("{name} loop failed")))
            }
            Err(e) => {
                error!("loop task aborted: {e}");
                Some(anyhow::Error::new(e).context("loop task aborted"))
            }
        }
    }

    /// Trigger a speed test now, declining if one is in flight
    pub fn run_speed_test_now(&self) -> RunNowResponse {
        self.runner().run_now()
    }

    pub fn get_runtime_state(&self) -> RuntimeSnapshot {
        self.runtime.snapshot()
    }

    pub async fn get_current_period(&self) -> StorageResult<Option<ConnectivityPeriod>> {
        self.store.get_open_period().await
    }

    pub async fn get_last_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>> {
        self.store.get_last_speed_test().await
    }

    pub async fn get_last_successful_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>> {
        self.store.get_last_successful_speed_test().await
    }

    pub async fn periods(
        &self,
        range: QueryRange,
        is_up: Option<bool>,
    ) -> StorageResult<Vec<ConnectivityPeriod>> {
        self.store.query_periods(range, is_up).await
    }

    pub async fn checks(&self, range: QueryRange) -> StorageResult<Vec<ConnectivityCheck>> {
        self.store.query_checks(range).await
    }

    pub async fn speed_tests(&self, range: QueryRange) -> StorageResult<Vec<SpeedTestRecord>> {
        self.store.query_speed_tests(range).await
    }

    /// Store a live setting; takes effect on the next tick of the loop that reads it
    pub async fn set_setting(&self, key: &str, value: &str) -> StorageResult<()> {
        if key == settings::SPEEDTEST_MODE {
            value
                .parse::<settings::SpeedTestMode>()
                .map_err(StorageError::InvalidConfig)?;
        }
        self.store.set_setting(key, value, self.clock.now()).await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
