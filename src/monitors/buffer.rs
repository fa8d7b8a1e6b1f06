//! Batched persistence of raw connectivity samples
//!
//! ## Flush triggers
//!
//! - **Size**: pending samples reach `max_count`
//! - **Time**: `max_seconds` elapsed since the last flush
//! - **Shutdown**: the owning loop flushes unconditionally before it exits
//!
//! With `max_seconds <= 0` and `max_count <= 1` the buffer is bypassed and
//! every sample is written on its own (write-through).

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::storage::{ConnectivityCheck, StorageBackend, StorageResult};

pub struct CheckBuffer {
    pending: Vec<ConnectivityCheck>,
    max_count: usize,
    max_seconds: f64,
    last_flush: Instant,
}

impl CheckBuffer {
    pub fn new(max_count: usize, max_seconds: f64) -> Self {
        let mut buffer = Self {
            pending: Vec::new(),
            max_count: 1,
            max_seconds: 0.0,
            last_flush: Instant::now(),
        };
        buffer.configure(max_count, max_seconds);
        buffer
    }

    /// Apply new thresholds; pending samples are kept
    pub fn configure(&mut self, max_count: usize, max_seconds: f64) {
        self.max_count = max_count.max(1);
        self.max_seconds = if max_seconds.is_finite() {
            max_seconds.max(0.0)
        } else {
            0.0
        };
    }

    pub fn is_write_through(&self) -> bool {
        self.max_seconds <= 0.0 && self.max_count <= 1
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_due(&self) -> bool {
        self.pending.len() >= self.max_count
            || Duration::try_from_secs_f64(self.max_seconds)
                .is_ok_and(|max_age| self.last_flush.elapsed() >= max_age)
    }

    /// Accept one sample, writing it or a whole batch when a threshold is hit
    pub async fn push(
        &mut self,
        check: ConnectivityCheck,
        store: &dyn StorageBackend,
    ) -> StorageResult<()> {
        if self.is_write_through() {
            trace!("write-through sample at {}", check.checked_at);
            return store.record_connectivity_check(check).await;
        }

        self.pending.push(check);
        if self.is_due() {
            self.flush(store).await?;
        }
        Ok(())
    }

    /// Write every pending sample in one batch
    ///
    /// On failure the samples stay pending so a later flush can retry them.
    #[instrument(skip_all, fields(pending = self.pending.len()))]
    pub async fn flush(&mut self, store: &dyn StorageBackend) -> StorageResult<usize> {
        if self.pending.is_empty() {
            self.last_flush = Instant::now();
            return Ok(0);
        }

        let count = self.pending.len();
        match store.record_connectivity_checks(self.pending.clone()).await {
            Ok(()) => {
                self.pending.clear();
                self.last_flush = Instant::now();
                debug!("flushed {count} connectivity checks");
                Ok(count)
            }
            Err(e) => {
                warn!("failed to flush {count} connectivity checks: {e}");
                Err(e)
            }
        }
    }
}
