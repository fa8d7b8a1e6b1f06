//! Shared fakes and fixtures for the integration tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use linkwatch::clock::Clock;
use linkwatch::config::{Config, NotifyConfig, StorageConfig};
use linkwatch::monitors::{ProbeOutcome, ReachabilityProbe};
use linkwatch::notify::{Outage, OutageNotifier};
use linkwatch::speedtest::{MeasureRequest, Measurement, ThroughputProbe};
use linkwatch::storage::{ConnectivityPeriod, MemoryBackend, StorageBackend};
use tokio_util::sync::CancellationToken;

/// Hand-driven clock for deterministic loops
///
/// Every tick delay advances the clock by `step` and returns a 1ms sleep,
/// so a loop iterates quickly while its timestamps move in fixed strides.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    step: chrono::Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            now: Mutex::new(start),
            step,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn until_next_tick(&self, _interval_seconds: f64) -> Duration {
        *self.now.lock().unwrap() += self.step;
        Duration::from_millis(1)
    }
}

/// Fixed starting point for every manual clock
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap()
}

pub fn manual_clock(step: chrono::Duration) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(base_time(), step))
}

/// Configuration with short timeouts and no external endpoints
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage = Some(StorageConfig::None);

    config.connectivity.target = "probe.test".to_string();
    config.connectivity.default_port = 443;
    config.connectivity.timeout_seconds = 0.5;
    config.connectivity.interval_seconds = 0.1;
    config.connectivity.buffer_seconds = 3600.0;
    config.connectivity.buffer_max = 5;

    config.speedtest.mode = "url".to_string();
    config.speedtest.url = Some("http://speed.test/file.bin".to_string());
    config.speedtest.upload_url = None;
    config.speedtest.duration_seconds = 1.0;
    config.speedtest.interval_seconds = 900.0;
    config.speedtest.timeout_seconds = 1.0;
    config.speedtest.skip_if_offline = true;
    config.speedtest.servers_url = "http://127.0.0.1:9/servers".to_string();

    config.notify = NotifyConfig {
        min_outage_seconds: 60.0,
        sink: None,
    };
    config
}

pub fn memory_store() -> (Arc<MemoryBackend>, Arc<dyn StorageBackend>) {
    let store = Arc::new(MemoryBackend::new());
    let dyn_store: Arc<dyn StorageBackend> = store.clone();
    (store, dyn_store)
}

/// Replays a fixed sequence of reachability samples
///
/// Once the script is used up it either cancels `cancel_when_done` (so the
/// loop stops after the final tick) or keeps repeating the last sample.
pub struct ScriptedProbe {
    samples: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    cancel_when_done: Option<CancellationToken>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(samples: &[bool], cancel_when_done: Option<CancellationToken>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples.iter().copied().collect()),
            last: Mutex::new(samples.last().copied().unwrap_or(true)),
            cancel_when_done,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self, _target: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (sample, exhausted) = {
            let mut samples = self.samples.lock().unwrap();
            let sample = samples.pop_front().unwrap_or(*self.last.lock().unwrap());
            (sample, samples.is_empty())
        };

        if exhausted {
            if let Some(cancel) = &self.cancel_when_done {
                cancel.cancel();
            }
        }

        if sample {
            ProbeOutcome::up(5.0)
        } else {
            ProbeOutcome::down()
        }
    }
}

/// Keeps every outage it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    outages: Mutex<Vec<Outage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn outages(&self) -> Vec<Outage> {
        self.outages.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutageNotifier for RecordingNotifier {
    async fn notify_outage(&self, outage: &Outage) -> anyhow::Result<()> {
        self.outages.lock().unwrap().push(outage.clone());
        if self.fail {
            anyhow::bail!("sink unavailable");
        }
        Ok(())
    }
}

/// Throughput probe that takes `delay` and reports 50 Mbps
#[derive(Default)]
pub struct FakeThroughput {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeThroughput {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThroughputProbe for FakeThroughput {
    async fn measure(&self, _request: &MeasureRequest) -> Measurement {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Measurement {
            duration_seconds: 1.0,
            bytes_downloaded: 6_250_000,
            mbps: 50.0,
            ..Measurement::default()
        }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Exactly one open period, contiguous and alternating in `started_at` order
pub fn assert_period_invariants(periods: &[ConnectivityPeriod]) {
    let open = periods.iter().filter(|p| p.is_open()).count();
    assert_eq!(open, 1, "expected exactly one open period: {periods:#?}");
    assert!(periods.last().is_some_and(|p| p.is_open()), "open period must be the latest");

    for pair in periods.windows(2) {
        assert_eq!(pair[0].ended_at, Some(pair[1].started_at), "gap between periods");
        assert_ne!(pair[0].is_up, pair[1].is_up, "consecutive periods share a state");
    }
}
