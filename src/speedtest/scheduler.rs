use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::runner::SpeedTestRunner;
use crate::clock::Clock;
use crate::config::Config;
use crate::settings::SpeedTestSettings;
use crate::storage::{StorageBackend, StorageResult};

/// Drives [`SpeedTestRunner`] on its own midnight-aligned interval
///
/// A run that is already in flight when the token fires is allowed to
/// finish and persist its record; cancellation is observed between runs.
pub struct SpeedTestScheduler {
    runner: SpeedTestRunner,
    store: Arc<dyn StorageBackend>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl SpeedTestScheduler {
    pub fn new(
        runner: SpeedTestRunner,
        store: Arc<dyn StorageBackend>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            store,
            config,
            clock,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(self, cancel: CancellationToken) -> StorageResult<()> {
        info!("starting speed test scheduler");

        while !cancel.is_cancelled() {
            let settings = SpeedTestSettings::load(self.store.as_ref(), &self.config).await?;

            let record = self.runner.run_once().await?;
            debug!("scheduled speed test stored as {:?}", record.id);

            let delay = self.clock.until_next_tick(settings.interval_seconds);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("speed test scheduler stopped");
        Ok(())
    }
}
