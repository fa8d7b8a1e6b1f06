//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait implemented by every
//! persistence layer (SQLite, in-memory). The monitoring loops only ever
//! talk to `dyn StorageBackend`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{ConnectivityCheck, ConnectivityPeriod, SpeedTestRecord};

/// Time window for range queries
#[derive(Debug, Clone, Copy)]
pub struct QueryRange {
    /// Start of time range
    pub start: DateTime<Utc>,

    /// End of time range
    pub end: DateTime<Utc>,
}

impl QueryRange {
    /// Build a range, swapping the bounds if they are reversed
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start > end {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// Every method is individually atomic. Implementations must be
/// `Send + Sync` as they are shared between the connectivity loop, the
/// speed test loop and on-demand callers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Settings
    // ========================================================================

    /// Fetch the stored values for `keys`; missing keys are absent from the map
    async fn get_settings(&self, keys: &[&str]) -> StorageResult<HashMap<String, String>>;

    /// Insert or replace a setting
    async fn set_setting(&self, key: &str, value: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Insert a setting only if the key has no value yet
    ///
    /// Returns `true` if the value was inserted.
    async fn ensure_default_setting(
        &self,
        key: &str,
        value: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // ========================================================================
    // Connectivity periods
    // ========================================================================

    /// The currently open period, if monitoring has ever started
    async fn get_open_period(&self) -> StorageResult<Option<ConnectivityPeriod>>;

    /// Apply one reachability observation to the period table
    ///
    /// - no open period: open one in state `is_up`
    /// - open period with the same state: no-op
    /// - open period with a different state: close it at `at` and open a
    ///   new one starting at `at`
    async fn record_connectivity(&self, is_up: bool, at: DateTime<Utc>) -> StorageResult<()>;

    /// Periods overlapping `range`, ordered by `started_at`
    ///
    /// `is_up` restricts the result to one state.
    async fn query_periods(
        &self,
        range: QueryRange,
        is_up: Option<bool>,
    ) -> StorageResult<Vec<ConnectivityPeriod>>;

    // ========================================================================
    // Raw samples
    // ========================================================================

    /// Append a single sample (write-through mode)
    async fn record_connectivity_check(&self, check: ConnectivityCheck) -> StorageResult<()>;

    /// Append a batch of samples in one transaction; empty batches are a no-op
    async fn record_connectivity_checks(&self, checks: Vec<ConnectivityCheck>)
    -> StorageResult<()>;

    /// Samples with `checked_at` inside `range` (both bounds inclusive)
    async fn query_checks(&self, range: QueryRange) -> StorageResult<Vec<ConnectivityCheck>>;

    // ========================================================================
    // Speed tests
    // ========================================================================

    /// Append a speed test record, returning its id
    async fn record_speed_test(&self, record: &SpeedTestRecord) -> StorageResult<i64>;

    /// Most recent record, successful or not
    async fn get_last_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>>;

    /// Most recent record without an error
    async fn get_last_successful_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>>;

    /// Records with `started_at` inside `range` (both bounds inclusive)
    async fn query_speed_tests(&self, range: QueryRange) -> StorageResult<Vec<SpeedTestRecord>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
