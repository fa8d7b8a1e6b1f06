//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Report readers never block the monitoring writers
//! - **Connection pooling**: Shared by both loops and on-demand callers
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Timestamps
//!
//! Stored as Unix milliseconds (`INTEGER`), so every range query is a
//! plain integer comparison on an indexed column.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{ConnectivityCheck, ConnectivityPeriod, SpeedTestRecord};

const SPEED_TEST_COLUMNS: &str = "id, started_at, duration_seconds, bytes_downloaded, mbps, \
     upload_mbps, ping_ms, server_name, server_country, speedtest_mode, error";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file (and its parent directory) if missing
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use linkwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./data/linkwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref();
        let db_path_str = db_path.to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::SchemaMigration(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::CorruptRow(format!("timestamp out of range: {millis}"))
        })
    }

    fn period_from_row(row: &SqliteRow) -> StorageResult<ConnectivityPeriod> {
        Ok(ConnectivityPeriod {
            id: row.get("id"),
            started_at: Self::millis_to_timestamp(row.get("started_at"))?,
            ended_at: row
                .get::<Option<i64>, _>("ended_at")
                .map(Self::millis_to_timestamp)
                .transpose()?,
            is_up: row.get("is_up"),
        })
    }

    fn check_from_row(row: &SqliteRow) -> StorageResult<ConnectivityCheck> {
        Ok(ConnectivityCheck {
            checked_at: Self::millis_to_timestamp(row.get("checked_at"))?,
            is_up: row.get("is_up"),
            latency_ms: row.get("latency_ms"),
        })
    }

    fn speed_test_from_row(row: &SqliteRow) -> StorageResult<SpeedTestRecord> {
        Ok(SpeedTestRecord {
            id: Some(row.get("id")),
            started_at: Self::millis_to_timestamp(row.get("started_at"))?,
            duration_seconds: row.get("duration_seconds"),
            bytes_downloaded: row.get::<i64, _>("bytes_downloaded").max(0) as u64,
            mbps: row.get("mbps"),
            upload_mbps: row.get("upload_mbps"),
            ping_ms: row.get("ping_ms"),
            server_name: row.get("server_name"),
            server_country: row.get("server_country"),
            speedtest_mode: row.get("speedtest_mode"),
            error: row.get("error"),
        })
    }

    async fn fetch_one_speed_test(&self, sql: &str) -> StorageResult<Option<SpeedTestRecord>> {
        let row = sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        row.as_ref().map(Self::speed_test_from_row).transpose()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn get_settings(&self, keys: &[&str]) -> StorageResult<HashMap<String, String>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; keys.len()].join(",");
        let sql = format!("SELECT key, value FROM settings WHERE key IN ({placeholders})");

        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(*key);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect())
    }

    #[instrument(skip(self, value))]
    async fn set_setting(&self, key: &str, value: &str, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::timestamp_to_millis(&at))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn ensure_default_setting(
        &self,
        key: &str,
        value: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(Self::timestamp_to_millis(&at))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_open_period(&self) -> StorageResult<Option<ConnectivityPeriod>> {
        let row = sqlx::query(
            r#"
            SELECT id, started_at, ended_at, is_up
            FROM connectivity_periods
            WHERE ended_at IS NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        row.as_ref().map(Self::period_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn record_connectivity(&self, is_up: bool, at: DateTime<Utc>) -> StorageResult<()> {
        let at_millis = Self::timestamp_to_millis(&at);

        // read and write in one transaction so the flip is atomic
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let current = sqlx::query(
            "SELECT id, is_up FROM connectivity_periods WHERE ended_at IS NULL ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        if let Some(row) = current {
            let id: i64 = row.get("id");
            let current_is_up: bool = row.get("is_up");

            if current_is_up == is_up {
                trace!("period {id} unchanged");
                return Ok(());
            }

            sqlx::query("UPDATE connectivity_periods SET ended_at = ? WHERE id = ?")
                .bind(at_millis)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;

            debug!("closed period {id} at {at}");
        }

        sqlx::query("INSERT INTO connectivity_periods (started_at, ended_at, is_up) VALUES (?, NULL, ?)")
            .bind(at_millis)
            .bind(is_up)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_periods(
        &self,
        range: QueryRange,
        is_up: Option<bool>,
    ) -> StorageResult<Vec<ConnectivityPeriod>> {
        let state_clause = if is_up.is_some() { "AND is_up = ?" } else { "" };

        let sql = format!(
            r#"
            SELECT id, started_at, ended_at, is_up
            FROM connectivity_periods
            WHERE started_at < ?
              AND (ended_at IS NULL OR ended_at > ?)
              {state_clause}
            ORDER BY started_at ASC, id ASC
            "#
        );

        let mut query = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&range.end))
            .bind(Self::timestamp_to_millis(&range.start));
        if let Some(state) = is_up {
            query = query.bind(state);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(Self::period_from_row).collect()
    }

    #[instrument(skip(self, check))]
    async fn record_connectivity_check(&self, check: ConnectivityCheck) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO connectivity_checks (checked_at, is_up, latency_ms) VALUES (?, ?, ?)",
        )
        .bind(Self::timestamp_to_millis(&check.checked_at))
        .bind(check.is_up)
        .bind(check.latency_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, checks), fields(count = checks.len()))]
    async fn record_connectivity_checks(
        &self,
        checks: Vec<ConnectivityCheck>,
    ) -> StorageResult<()> {
        if checks.is_empty() {
            return Ok(());
        }

        debug!("inserting {} connectivity checks into SQLite", checks.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        for check in checks {
            sqlx::query(
                "INSERT INTO connectivity_checks (checked_at, is_up, latency_ms) VALUES (?, ?, ?)",
            )
            .bind(Self::timestamp_to_millis(&check.checked_at))
            .bind(check.is_up)
            .bind(check.latency_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_checks(&self, range: QueryRange) -> StorageResult<Vec<ConnectivityCheck>> {
        let rows = sqlx::query(
            r#"
            SELECT checked_at, is_up, latency_ms
            FROM connectivity_checks
            WHERE checked_at >= ? AND checked_at <= ?
            ORDER BY checked_at ASC, id ASC
            "#,
        )
        .bind(Self::timestamp_to_millis(&range.start))
        .bind(Self::timestamp_to_millis(&range.end))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(Self::check_from_row).collect()
    }

    #[instrument(skip(self, record), fields(mode = %record.speedtest_mode))]
    async fn record_speed_test(&self, record: &SpeedTestRecord) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO speed_tests (
                started_at, duration_seconds, bytes_downloaded, mbps,
                upload_mbps, ping_ms, server_name, server_country,
                speedtest_mode, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Self::timestamp_to_millis(&record.started_at))
        .bind(record.duration_seconds)
        .bind(record.bytes_downloaded as i64)
        .bind(record.mbps)
        .bind(record.upload_mbps)
        .bind(record.ping_ms)
        .bind(record.server_name.as_deref())
        .bind(record.server_country.as_deref())
        .bind(&record.speedtest_mode)
        .bind(record.error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn get_last_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>> {
        let sql = format!("SELECT {SPEED_TEST_COLUMNS} FROM speed_tests ORDER BY id DESC LIMIT 1");
        self.fetch_one_speed_test(&sql).await
    }

    #[instrument(skip(self))]
    async fn get_last_successful_speed_test(&self) -> StorageResult<Option<SpeedTestRecord>> {
        let sql = format!(
            "SELECT {SPEED_TEST_COLUMNS} FROM speed_tests WHERE error IS NULL ORDER BY id DESC LIMIT 1"
        );
        self.fetch_one_speed_test(&sql).await
    }

    #[instrument(skip(self))]
    async fn query_speed_tests(&self, range: QueryRange) -> StorageResult<Vec<SpeedTestRecord>> {
        let sql = format!(
            r#"
            SELECT {SPEED_TEST_COLUMNS}
            FROM speed_tests
            WHERE started_at >= ? AND started_at <= ?
            ORDER BY started_at ASC, id ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&range.start))
            .bind(Self::timestamp_to_millis(&range.end))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(Self::speed_test_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
