//! In-memory storage backend (no persistence)
//!
//! This backend keeps every table in process memory behind a mutex.
//! It's useful for:
//! - Testing without database dependencies
//! - Running without a data directory (`"backend": "none"`)
//!
//! It also records how samples were written (single rows vs. batches) so
//! the buffering policy can be observed from tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{ConnectivityCheck, ConnectivityPeriod, Setting, SpeedTestRecord};

/// How a sample reached the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckWrite {
    Single,
    Batch(usize),
}

#[derive(Default)]
struct Tables {
    settings: HashMap<String, Setting>,
    periods: Vec<ConnectivityPeriod>,
    checks: Vec<ConnectivityCheck>,
    speed_tests: Vec<SpeedTestRecord>,
    check_writes: Vec<CheckWrite>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, simulating a lost database
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every period ever written, in insertion order
    pub fn periods(&self) -> Vec<ConnectivityPeriod> {
        self.lock().periods.clone()
    }

    /// Every sample ever written, in insertion order
    pub fn checks(&self) -> Vec<ConnectivityCheck> {
        self.lock().checks.clone()
    }

    /// Every speed test ever written, in insertion order
    pub fn speed_tests(&self) -> Vec<SpeedTestRecord> {
        self.lock().speed_tests.clone()
    }

    /// The write calls that delivered samples, in order
    pub fn check_writes(&self) -> Vec<CheckWrite> {
        self.lock().check_writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // a panic while holding the lock leaves the tables consistent
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tables(&self) -> StorageResult<std::sync::MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory backend marked unavailable".to_string(),
            ));
        }
        Ok(self.lock())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get_settings(&self, keys: &[&str]) -> StorageResult<HashMap<String, String>> {
        let tables = self.tables()?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                tables
                    .settings
                    .get(*key)
                    .map(|s| (s.key.clone(), s.value.clone()))
            })
            .collect())
    }

    async fn set_setting(&self, key: &str, value: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut tables = self.tables()?;
        tables.settings.insert(
            key.to_string(),
            Setting {
                key: key.to_string(),
                value: value.to_string(),
                updated_at: at,
            },
        );
        Ok(())
    }

    async fn ensure_default_setting(
        &self,
        key: &str,
        value: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut tables = self.tables()?;
        if tables.settings.contains_key(key) {
            return Ok(false);
        }
        tables.settings.insert(
            key.to_string(),
            Setting {
                key: key.to_string(),
                value: value.to_string(),
                updated_at: at,
            },
        );
        Ok(true)
    }

    async fn get_open_period(&self) -> StorageResult<Option<ConnectivityPeriod>> {
        let tables = self.tables()?;
        Ok(tables.periods.iter().rev().find(|p| p.is_open()).cloned())
    }

    async fn record_connectivity(&self, is_up: bool, at: DateTime<Utc>) -> StorageResult<()> {
        let mut tables = self.tables()?;
        let next_id = tables.periods.len() as i64 + 1;

        match tables.periods.iter_mut().rev().find(|p| p.is_open()) {
            Some(open) if open.is_up == is_up => return Ok(()),
            Some(open) => {
                trace!("closing period {} at {}", open.id, at);
                open.ended_at = Some(at);
            }
            None => {}
        }

        tables.periods.push(ConnectivityPeriod {
            id: next_id,
            started_at: at,
            ended_at: None,
            is_up,
        });
        Ok(())
    }

    async fn query_periods(
        &self,
        range: QueryRange,
        is_up: Option<bool>,
    ) -> StorageResult<Vec<ConnectivityPeriod>> {
        let tables = self.tables()?;
        let mut periods: Vec<ConnectivityPeriod> = tables
            .periods
            .iter()
            .filter(|p| p.overlaps(range.start, range.end))
            .filter(|p| is_up.is_none_or(|state| p.is_up == state))
            .cloned()
            .collect();
        periods.sort_by_key(|p| p.started_at);
        Ok(periods)
    }

    async fn record_connectivity_check(&self, check: ConnectivityCheck) -> StorageResult<()> {
        let mut tables = self.tables()?;
        tables.checks.push(check);
        tables.check_writes.push(CheckWrite::Single);
        Ok(())
    }

    async fn record_connectivity_checks(
        &self,
        checks: Vec<ConnectivityCheck>,
    ) -> StorageResult<()> {
        if checks.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables()?;
        debug!("in-memory backend: storing {} checks", checks.len());
        tables.check_writes.push(CheckWrite::Batch(checks.len()));
        tables.checks.extend(checks);
        Ok(())
    }

    async fn query_checks(&self, range: QueryRange) -> StorageResult<Vec<ConnectivityCheck>> {
        let tables = self.tables()?;
        let mut checks: Vec<ConnectivityCheck> = tables
            .checks
            .iter()
            .filter(|c| c.checked_at >= range.start && c.checked_at <= range.end)
            .cloned()
            .collect();
        checks.sort_by_key(|c| c.checked_at);
        Ok(checks)
    }

    async fn record_speed_test(&self, record: &SpeedTestRecord) -> StorageResult<i64> {
        let mut tables = self.tables()?;
        let id = tables.speed_tests.len() as i64 + 1;
        let mut stored = record.clone();
        stored.id = Some(id);
        tables.speed_tests.push(stored);
        Ok(id)
    }

    async fn get_last_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>> {
        let tables = self.tables()?;
        Ok(tables.speed_tests.last().cloned())
    }

    async fn get_last_successful_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>> {
        let tables = self.tables()?;
        Ok(tables
            .speed_tests
            .iter()
            .rev()
            .find(|r| r.is_success())
            .cloned())
    }

    async fn query_speed_tests(&self, range: QueryRange) -> StorageResult<Vec<SpeedTestRecord>> {
        let tables = self.tables()?;
        let mut records: Vec<SpeedTestRecord> = tables
            .speed_tests
            .iter()
            .filter(|r| r.started_at >= range.start && r.started_at <= range.end)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.tables()?;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("periods".to_string(), tables.periods.len().to_string()),
                ("checks".to_string(), tables.checks.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
