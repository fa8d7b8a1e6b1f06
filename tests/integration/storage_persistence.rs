//! SQLite persistence across restarts
//!
//! Verifies:
//! - Periods and checks written by the loop survive a reopen
//! - An outage open at shutdown is closed and notified after restart
//! - Speed test records round through the store with their errors

use std::sync::Arc;

use chrono::Duration;
use linkwatch::config::StorageConfig;
use linkwatch::monitors::ConnectivityMonitor;
use linkwatch::notify::OutageNotifier;
use linkwatch::service::open_store;
use linkwatch::storage::sqlite::SqliteBackend;
use linkwatch::storage::{QueryRange, StorageBackend};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

async fn run_monitor(
    store: Arc<dyn StorageBackend>,
    samples: &[bool],
    start: chrono::DateTime<chrono::Utc>,
    notifier: Arc<RecordingNotifier>,
) {
    let cancel = CancellationToken::new();
    let probe = ScriptedProbe::new(samples, Some(cancel.clone()));
    let clock = Arc::new(ManualClock::new(start, Duration::seconds(10)));

    ConnectivityMonitor::new(store, probe, clock, Arc::new(test_config()))
        .with_notifier(Some(notifier as Arc<dyn OutageNotifier>))
        .run(cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_outage_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("data").join("linkwatch.db");
    let notifier = Arc::new(RecordingNotifier::default());

    // first run ends while the link is down
    {
        let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        run_monitor(store.clone(), &[true, true, false], base_time(), notifier.clone()).await;
        store.close().await.unwrap();
    }

    let went_down = base_time() + Duration::seconds(20);
    let restarted_at = base_time() + Duration::seconds(600);

    let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let open = store.get_open_period().await.unwrap().unwrap();
    assert!(!open.is_up);
    assert_eq!(open.started_at, went_down);

    let range = QueryRange::new(base_time() - Duration::hours(1), base_time() + Duration::hours(1));
    assert_eq!(store.query_checks(range).await.unwrap().len(), 3);

    run_monitor(store.clone(), &[true], restarted_at, notifier.clone()).await;

    let outages = notifier.outages();
    assert_eq!(outages.len(), 1);
    assert_eq!(outages[0].started_at, went_down);
    assert_eq!(outages[0].ended_at, restarted_at);

    let periods = store.query_periods(range, None).await.unwrap();
    assert_period_invariants(&periods);
    assert_eq!(periods.len(), 3);

    let down = store.query_periods(range, Some(false)).await.unwrap();
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].ended_at, Some(restarted_at));
}

#[tokio::test]
async fn test_open_store_sqlite_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::Sqlite {
        path: dir.path().join("linkwatch.db"),
    };

    let store = open_store(&config).await.unwrap();
    let health = store.health_check().await.unwrap();
    assert!(health.healthy);

    let record = linkwatch::storage::SpeedTestRecord {
        id: None,
        started_at: base_time(),
        duration_seconds: 0.0,
        bytes_downloaded: 0,
        mbps: 0.0,
        upload_mbps: None,
        ping_ms: None,
        server_name: None,
        server_country: None,
        speedtest_mode: "url".to_string(),
        error: Some("offline (skipped)".to_string()),
    };
    let id = store.record_speed_test(&record).await.unwrap();

    let last = store.get_last_speed_test().await.unwrap().unwrap();
    assert_eq!(last.id, Some(id));
    assert_eq!(last.error.as_deref(), Some("offline (skipped)"));
    assert_eq!(store.get_last_successful_speed_test().await.unwrap(), None);

    store.close().await.unwrap();
}
