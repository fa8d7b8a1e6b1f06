//! Process-wide speed test state and the single-flight lock
//!
//! A [`RunPermit`] is the only way to run a speed test. Holding one means
//! holding the lock; `running_since` is set when it is handed out and
//! cleared when it is dropped, whichever way the run ended.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Read-only view of the runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    pub running: bool,
    pub running_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    lock: Arc<Mutex<()>>,
    running_since: RwLock<Option<DateTime<Utc>>>,
}

/// Shared handle; clones observe the same lock and flag
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    inner: Arc<Inner>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock and mark a run as started at `at`
    pub async fn acquire(&self, at: DateTime<Utc>) -> RunPermit {
        let guard = self.inner.lock.clone().lock_owned().await;
        self.permit(guard, at)
    }

    /// Take the lock only if no run is in flight
    pub fn try_acquire(&self, at: DateTime<Utc>) -> Option<RunPermit> {
        let guard = self.inner.lock.clone().try_lock_owned().ok()?;
        Some(self.permit(guard, at))
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let running_since = *self
            .inner
            .running_since
            .read()
            .unwrap_or_else(|e| e.into_inner());

        RuntimeSnapshot {
            running: running_since.is_some(),
            running_since,
        }
    }

    pub fn is_running(&self) -> bool {
        self.snapshot().running
    }

    fn permit(&self, guard: OwnedMutexGuard<()>, at: DateTime<Utc>) -> RunPermit {
        self.set_running_since(Some(at));
        RunPermit {
            state: self.clone(),
            _guard: guard,
        }
    }

    fn set_running_since(&self, value: Option<DateTime<Utc>>) {
        *self
            .inner
            .running_since
            .write()
            .unwrap_or_else(|e| e.into_inner()) = value;
    }
}

/// Exclusive right to run one speed test
#[derive(Debug)]
pub struct RunPermit {
    state: RuntimeState,
    // released after `drop` below has cleared the flag
    _guard: OwnedMutexGuard<()>,
}

impl RunPermit {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.snapshot().running_since
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.state.set_running_since(None);
    }
}
