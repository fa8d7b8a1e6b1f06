//! Connectivity loop against the in-memory backend
//!
//! Verifies:
//! - Periods stay contiguous with exactly one open period
//! - Samples are batched by count and flushed on shutdown
//! - Write-through mode stores every sample on its own
//! - Outage notifications honour the minimum duration
//! - An open `Down` period survives a restart and still notifies
//! - Storage failures stop the loop, notifier failures do not

use std::sync::Arc;

use chrono::Duration;
use linkwatch::clock::SystemClock;
use linkwatch::monitors::ConnectivityMonitor;
use linkwatch::settings;
use linkwatch::storage::StorageBackend;
use linkwatch::storage::memory::CheckWrite;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

async fn run_script(
    store: Arc<dyn StorageBackend>,
    samples: &[bool],
    step: Duration,
    notifier: Option<Arc<RecordingNotifier>>,
) -> linkwatch::storage::StorageResult<()> {
    let cancel = CancellationToken::new();
    let probe = ScriptedProbe::new(samples, Some(cancel.clone()));

    let monitor = ConnectivityMonitor::new(
        store,
        probe,
        manual_clock(step),
        Arc::new(test_config()),
    )
    .with_notifier(notifier.map(|n| n as Arc<dyn linkwatch::notify::OutageNotifier>));

    tokio::time::timeout(std::time::Duration::from_secs(10), monitor.run(cancel))
        .await
        .expect("connectivity loop did not stop")
}

#[tokio::test]
async fn test_periods_follow_flips() {
    let (store, dyn_store) = memory_store();

    run_script(
        dyn_store,
        &[true, true, false, false, false, true, false, true],
        Duration::seconds(1),
        None,
    )
    .await
    .unwrap();

    let periods = store.periods();
    assert_period_invariants(&periods);

    let states: Vec<bool> = periods.iter().map(|p| p.is_up).collect();
    assert_eq!(states, vec![true, false, true, false, true]);

    // first sample at the clock's start, one second per tick
    assert_eq!(periods[0].started_at, base_time());
    assert_eq!(periods[1].started_at, base_time() + Duration::seconds(2));
    assert_eq!(periods[2].started_at, base_time() + Duration::seconds(5));
}

#[tokio::test]
async fn test_checks_batched_by_count() {
    let (store, dyn_store) = memory_store();

    run_script(dyn_store, &[true; 12], Duration::seconds(1), None)
        .await
        .unwrap();

    assert_eq!(
        store.check_writes(),
        vec![CheckWrite::Batch(5), CheckWrite::Batch(5), CheckWrite::Batch(2)]
    );

    let checks = store.checks();
    assert_eq!(checks.len(), 12);
    assert!(checks.iter().all(|c| c.is_up && c.latency_ms == Some(5.0)));
    assert!(checks.windows(2).all(|w| w[0].checked_at < w[1].checked_at));
}

#[tokio::test]
async fn test_write_through_when_buffering_disabled() {
    let (store, dyn_store) = memory_store();
    let now = base_time();
    dyn_store
        .set_setting(settings::CHECK_BUFFER_SECONDS, "0", now)
        .await
        .unwrap();
    dyn_store
        .set_setting(settings::CHECK_BUFFER_MAX, "1", now)
        .await
        .unwrap();

    run_script(dyn_store, &[true, false, true], Duration::seconds(1), None)
        .await
        .unwrap();

    assert_eq!(store.check_writes(), vec![CheckWrite::Single; 3]);

    let checks = store.checks();
    assert!(!checks[1].is_up);
    assert_eq!(checks[1].latency_ms, None);
}

#[tokio::test]
async fn test_short_outage_is_not_notified() {
    let (_, dyn_store) = memory_store();
    let notifier = Arc::new(RecordingNotifier::default());

    run_script(
        dyn_store,
        &[true, false, true],
        Duration::milliseconds(59_900),
        Some(notifier.clone()),
    )
    .await
    .unwrap();

    assert!(notifier.outages().is_empty());
}

#[tokio::test]
async fn test_outage_at_threshold_is_notified_once() {
    let (_, dyn_store) = memory_store();
    let notifier = Arc::new(RecordingNotifier::default());

    run_script(
        dyn_store,
        &[true, false, true, true],
        Duration::seconds(60),
        Some(notifier.clone()),
    )
    .await
    .unwrap();

    let outages = notifier.outages();
    assert_eq!(outages.len(), 1);
    assert_eq!(outages[0].started_at, base_time() + Duration::seconds(60));
    assert_eq!(outages[0].ended_at, base_time() + Duration::seconds(120));
    assert_eq!(outages[0].duration_seconds, 60.0);
}

#[tokio::test]
async fn test_first_sample_down_does_not_notify_until_restored() {
    let (_, dyn_store) = memory_store();
    let notifier = Arc::new(RecordingNotifier::default());

    run_script(
        dyn_store,
        &[false, false, false],
        Duration::seconds(120),
        Some(notifier.clone()),
    )
    .await
    .unwrap();

    assert!(notifier.outages().is_empty());
}

#[tokio::test]
async fn test_restart_adopts_open_outage() {
    let (store, dyn_store) = memory_store();
    let went_down = base_time() - Duration::seconds(300);
    dyn_store.record_connectivity(true, went_down - Duration::seconds(60)).await.unwrap();
    dyn_store.record_connectivity(false, went_down).await.unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    run_script(dyn_store, &[true], Duration::seconds(1), Some(notifier.clone()))
        .await
        .unwrap();

    let outages = notifier.outages();
    assert_eq!(outages.len(), 1);
    assert_eq!(outages[0].started_at, went_down);
    assert_eq!(outages[0].ended_at, base_time());
    assert_eq!(outages[0].duration_seconds, 300.0);

    let periods = store.periods();
    assert_period_invariants(&periods);
    assert_eq!(periods.len(), 3);
    assert_eq!(periods[1].ended_at, Some(base_time()));
}

#[tokio::test]
async fn test_notifier_failure_keeps_loop_running() {
    let (store, dyn_store) = memory_store();
    let notifier = Arc::new(RecordingNotifier::failing());

    run_script(
        dyn_store,
        &[true, false, true, true, true],
        Duration::seconds(90),
        Some(notifier.clone()),
    )
    .await
    .unwrap();

    assert_eq!(notifier.outages().len(), 1);
    assert_eq!(store.checks().len(), 5);
}

#[tokio::test]
async fn test_storage_failure_is_fatal() {
    let (store, dyn_store) = memory_store();
    store.set_unavailable(true);

    let result = run_script(dyn_store, &[true, true], Duration::seconds(1), None).await;

    assert!(result.is_err());
    assert!(store.periods().is_empty());
}

#[tokio::test]
async fn test_oversized_interval_settings_do_not_stop_the_loop() {
    let (store, dyn_store) = memory_store();
    let now = base_time();
    dyn_store
        .set_setting(settings::CONNECT_INTERVAL_SECONDS, "1e20", now)
        .await
        .unwrap();
    dyn_store
        .set_setting(settings::CHECK_BUFFER_SECONDS, "1e20", now)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let monitor = ConnectivityMonitor::new(
        dyn_store,
        ScriptedProbe::new(&[true], Some(cancel.clone())),
        Arc::new(SystemClock),
        Arc::new(test_config()),
    );

    let result = tokio::spawn(monitor.run(cancel))
        .await
        .expect("connectivity loop panicked");

    assert!(result.is_ok());
    assert_eq!(store.checks().len(), 1);
}
