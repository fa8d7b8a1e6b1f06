//! ConnectivityMonitor - samples reachability and maintains the period table
//!
//! ## Tick
//!
//! ```text
//! load settings → probe target → CheckBuffer::push → record_connectivity → OutageTracker → sleep to next aligned tick
//!                                                                               ↓
//!                                                                     OutageNotifier (>= threshold)
//! ```
//!
//! Raw samples go through the buffer while period transitions are written
//! on every tick. Any storage error ends the loop after a last flush attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::buffer::CheckBuffer;
use super::probe::ReachabilityProbe;
use crate::clock::Clock;
use crate::config::Config;
use crate::notify::{Outage, OutageNotifier, local_display};
use crate::settings::ConnectivitySettings;
use crate::storage::{ConnectivityCheck, ConnectivityPeriod, StorageBackend, StorageResult};

/// What a new sample changed
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// First sample without prior state, or same state as before
    Unchanged,
    /// `Up` to `Down`
    WentDown { at: DateTime<Utc> },
    /// `Down` to `Up`; `outage` is missing when the start was never observed
    Restored {
        at: DateTime<Utc>,
        outage: Option<Outage>,
    },
}

/// Up/down state machine turning samples into completed outages
#[derive(Debug, Default)]
pub struct OutageTracker {
    last_is_up: Option<bool>,
    outage_started_at: Option<DateTime<Utc>>,
}

impl OutageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from the period left open by a previous run
    pub fn adopt(&mut self, open: &ConnectivityPeriod) {
        self.last_is_up = Some(open.is_up);
        self.outage_started_at = (!open.is_up).then_some(open.started_at);
    }

    pub fn last_is_up(&self) -> Option<bool> {
        self.last_is_up
    }

    pub fn outage_started_at(&self) -> Option<DateTime<Utc>> {
        self.outage_started_at
    }

    pub fn observe(&mut self, is_up: bool, at: DateTime<Utc>) -> Transition {
        let previous = self.last_is_up.replace(is_up);

        match previous {
            Some(was_up) if was_up != is_up => {
                if is_up {
                    let outage = self.outage_started_at.take().map(|start| Outage::new(start, at));
                    Transition::Restored { at, outage }
                } else {
                    self.outage_started_at = Some(at);
                    Transition::WentDown { at }
                }
            }
            _ => Transition::Unchanged,
        }
    }
}

pub struct ConnectivityMonitor {
    store: Arc<dyn StorageBackend>,
    probe: Arc<dyn ReachabilityProbe>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    notifier: Option<Arc<dyn OutageNotifier>>,
    min_outage_seconds: f64,
}

impl ConnectivityMonitor {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        probe: Arc<dyn ReachabilityProbe>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        let min_outage_seconds = config.notify.min_outage_seconds;
        Self {
            store,
            probe,
            clock,
            config,
            notifier: None,
            min_outage_seconds,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn OutageNotifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run until `cancel` fires or storage fails
    ///
    /// Pending samples are flushed on both paths before returning.
    #[instrument(skip_all)]
    pub async fn run(self, cancel: CancellationToken) -> StorageResult<()> {
        info!("starting connectivity monitor");

        let mut buffer = CheckBuffer::new(
            self.config.connectivity.buffer_max.max(1) as usize,
            self.config.connectivity.buffer_seconds,
        );

        let result = self.run_loop(&mut buffer, &cancel).await;
        let flushed = buffer.flush(self.store.as_ref()).await;

        match (&result, &flushed) {
            (Err(e), _) => error!("connectivity monitor stopped: {e}"),
            (Ok(()), Err(e)) => error!("final flush of connectivity checks failed: {e}"),
            (Ok(()), Ok(count)) => info!("connectivity monitor stopped ({count} checks flushed)"),
        }

        result.and(flushed.map(|_| ()))
    }

    async fn run_loop(
        &self,
        buffer: &mut CheckBuffer,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let store = self.store.as_ref();

        let mut tracker = OutageTracker::new();
        if let Some(open) = store.get_open_period().await? {
            debug!("resuming from open period {} (is_up={})", open.id, open.is_up);
            tracker.adopt(&open);
        }

        while !cancel.is_cancelled() {
            let settings = ConnectivitySettings::load(store, &self.config).await?;
            buffer.configure(settings.buffer_max, settings.buffer_seconds);

            let outcome = self.probe.probe(&settings.target).await;
            let now = self.clock.now();

            buffer
                .push(
                    ConnectivityCheck {
                        checked_at: now,
                        is_up: outcome.is_up,
                        latency_ms: outcome.latency_ms,
                    },
                    store,
                )
                .await?;
            store.record_connectivity(outcome.is_up, now).await?;

            match tracker.observe(outcome.is_up, now) {
                Transition::Unchanged => {}
                Transition::WentDown { at } => {
                    info!("connectivity lost at {}", local_display(at));
                }
                Transition::Restored { at, outage } => {
                    info!("connectivity restored at {}", local_display(at));
                    if let Some(outage) = outage {
                        self.handle_outage(&outage).await;
                    }
                }
            }

            let delay = self.clock.until_next_tick(settings.interval_seconds);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(())
    }

    async fn handle_outage(&self, outage: &Outage) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        if outage.duration_seconds < self.min_outage_seconds {
            info!(
                "outage lasted {:.0}s (< {}), skipping notification",
                outage.duration_seconds, self.min_outage_seconds
            );
            return;
        }

        info!(
            "outage lasted {:.0}s (>= {}), sending notification",
            outage.duration_seconds, self.min_outage_seconds
        );
        if let Err(e) = notifier.notify_outage(outage).await {
            warn!("failed to deliver outage notification: {e:#}");
        }
    }
}
