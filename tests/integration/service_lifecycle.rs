//! Whole-process lifecycle through `LinkWatch`
//!
//! Verifies:
//! - Initialization seeds the live settings
//! - Both loops run until the shutdown signal
//! - Buffered samples are flushed before `run_until` returns
//! - Setting validation and run-now go through the context

use std::sync::Arc;
use std::time::Duration;

use linkwatch::LinkWatch;
use linkwatch::settings;
use linkwatch::storage::{QueryRange, StorageBackend, StorageError};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn linkwatch(dyn_store: Arc<dyn StorageBackend>, probe: Arc<ScriptedProbe>, throughput: Arc<FakeThroughput>) -> LinkWatch {
    LinkWatch::new(test_config(), dyn_store)
        .unwrap()
        .with_clock(manual_clock(chrono::Duration::seconds(1)))
        .with_probe(probe)
        .with_throughput(throughput.clone(), throughput)
        .with_notifier(None)
}

#[tokio::test]
async fn test_initialize_seeds_settings() {
    let (_, dyn_store) = memory_store();
    dyn_store
        .set_setting(settings::CONNECT_TARGET, "1.1.1.1:53", base_time())
        .await
        .unwrap();

    let service = linkwatch(
        dyn_store.clone(),
        ScriptedProbe::new(&[true], None),
        FakeThroughput::with_delay(Duration::ZERO),
    );
    service.initialize().await.unwrap();

    let values = dyn_store
        .get_settings(&[settings::CONNECT_TARGET, settings::SPEEDTEST_MODE])
        .await
        .unwrap();
    // existing values are never overwritten
    assert_eq!(values[settings::CONNECT_TARGET], "1.1.1.1:53");
    assert_eq!(values[settings::SPEEDTEST_MODE], "url");
}

#[tokio::test]
async fn test_run_until_signal_flushes_and_stops() {
    let (store, dyn_store) = memory_store();
    let probe = ScriptedProbe::new(&[true, true, false, true], None);
    let throughput = FakeThroughput::with_delay(Duration::ZERO);

    let service = Arc::new(linkwatch(dyn_store, probe.clone(), throughput.clone()));
    service.initialize().await.unwrap();

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .run_until(async {
                    let _ = stopped.await;
                })
                .await
        }
    });

    eventually("samples and a speed test", || {
        probe.calls() >= 8 && !store.speed_tests().is_empty()
    })
    .await;
    stop.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("shutdown did not complete")
        .unwrap()
        .unwrap();

    // every probe result is persisted, including the buffered tail
    assert_eq!(store.checks().len(), probe.calls());
    assert_period_invariants(&store.periods());
    assert!(service.cancellation_token().is_cancelled());
    assert!(!service.get_runtime_state().running);

    let current = service.get_current_period().await.unwrap().unwrap();
    assert!(current.is_up);

    let range = QueryRange::new(base_time(), service.now());
    assert_eq!(service.periods(range, Some(false)).await.unwrap().len(), 1);
    assert!(!service.speed_tests(range).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_loop_failure_ends_run() {
    let (store, dyn_store) = memory_store();
    let service = linkwatch(
        dyn_store,
        ScriptedProbe::new(&[true], None),
        FakeThroughput::with_delay(Duration::ZERO),
    );
    store.set_unavailable(true);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        service.run_until(std::future::pending()),
    )
    .await
    .expect("failure did not end the run");

    assert!(result.is_err());
}

#[tokio::test]
async fn test_set_setting_rejects_unknown_mode() {
    let (_, dyn_store) = memory_store();
    let service = linkwatch(
        dyn_store.clone(),
        ScriptedProbe::new(&[true], None),
        FakeThroughput::with_delay(Duration::ZERO),
    );

    let error = service
        .set_setting(settings::SPEEDTEST_MODE, "iperf")
        .await
        .unwrap_err();
    assert!(matches!(error, StorageError::InvalidConfig(_)));

    service
        .set_setting(settings::SPEEDTEST_MODE, "speedtest.net")
        .await
        .unwrap();
    let values = dyn_store.get_settings(&[settings::SPEEDTEST_MODE]).await.unwrap();
    assert_eq!(values[settings::SPEEDTEST_MODE], "speedtest.net");
}

#[tokio::test]
async fn test_run_speed_test_now_through_context() {
    let (store, dyn_store) = memory_store();
    let throughput = FakeThroughput::with_delay(Duration::from_millis(100));
    let service = linkwatch(dyn_store, ScriptedProbe::new(&[true], None), throughput.clone());

    let first = service.run_speed_test_now();
    let second = service.run_speed_test_now();
    assert!(first.started);
    assert!(!second.started);
    assert!(service.get_runtime_state().running);

    eventually("run-now to finish", || !service.get_runtime_state().running).await;
    assert_eq!(store.speed_tests().len(), 1);
    assert_eq!(
        service.get_last_speed_test().await.unwrap().map(|r| r.mbps),
        Some(50.0)
    );
}
