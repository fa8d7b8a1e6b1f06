//! speedtest.net measurement
//!
//! 1. Fetch the JSON server list
//! 2. For `speedtest.pl`, keep only servers located in Poland
//! 3. Probe the nearest candidates' `latency.txt` and keep the fastest
//! 4. Download `random{N}x{N}.jpg` images with several concurrent workers
//! 5. Upload zero payloads to the server's upload URL the same way
//!
//! A failed upload leaves `upload_mbps` empty without failing the record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use super::{MeasureRequest, Measurement, ThroughputProbe, elapsed_seconds, mbps, transfer_timeout};
use crate::settings::SpeedTestMode;

/// Candidates probed for latency
const MAX_CANDIDATES: usize = 5;

/// Latency samples per candidate, best one counts
const LATENCY_SAMPLES: usize = 3;

/// Concurrent transfer workers per direction
const WORKERS: usize = 4;

const DOWNLOAD_SIZES: [u32; 6] = [350, 500, 750, 1000, 1500, 2000];

const UPLOAD_PAYLOAD_SIZE: usize = 256 * 1024;

/// One entry of the speedtest.net server list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeedtestServer {
    /// Upload endpoint; the other resources live next to it
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default)]
    pub sponsor: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl SpeedtestServer {
    pub fn is_polish(&self) -> bool {
        self.cc.as_deref() == Some("PL") || self.country.as_deref() == Some("Poland")
    }

    pub fn display_name(&self) -> Option<String> {
        self.sponsor.clone().or_else(|| self.name.clone())
    }

    pub fn display_country(&self) -> Option<String> {
        self.country.clone().or_else(|| self.cc.clone())
    }

    fn resource(&self, name: &str) -> anyhow::Result<Url> {
        let base = Url::parse(&self.url).with_context(|| format!("invalid server url {:?}", self.url))?;
        Ok(base.join(name)?)
    }
}

/// Servers eligible for `mode`, nearest first
pub fn candidates(mut servers: Vec<SpeedtestServer>, mode: SpeedTestMode) -> anyhow::Result<Vec<SpeedtestServer>> {
    if mode == SpeedTestMode::SpeedtestPl {
        servers.retain(SpeedtestServer::is_polish);
        if servers.is_empty() {
            anyhow::bail!("no speedtest.pl servers available");
        }
    }
    if servers.is_empty() {
        anyhow::bail!("no speedtest.net servers available");
    }

    servers.sort_by(|a, b| {
        let a = a.distance.unwrap_or(f64::MAX);
        let b = b.distance.unwrap_or(f64::MAX);
        a.total_cmp(&b)
    });
    servers.truncate(MAX_CANDIDATES);
    Ok(servers)
}

#[derive(Debug, Clone)]
pub struct OoklaStrategy {
    client: Client,
    timeout: Duration,
    servers_url: String,
}

impl OoklaStrategy {
    pub fn new(servers_url: impl ToString, timeout_seconds: f64) -> anyhow::Result<Self> {
        let timeout = transfer_timeout(timeout_seconds);
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("failed to build speedtest.net client")?;

        Ok(Self {
            client,
            timeout,
            servers_url: servers_url.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_servers(&self) -> anyhow::Result<Vec<SpeedtestServer>> {
        let response = tokio::time::timeout(self.timeout, self.client.get(&self.servers_url).send())
            .await
            .context("timed out fetching server list")??
            .error_for_status()?;

        let servers: Vec<SpeedtestServer> = tokio::time::timeout(self.timeout, response.json())
            .await
            .context("timed out reading server list")?
            .context("invalid server list")?;

        debug!("fetched {} speedtest servers", servers.len());
        Ok(servers)
    }

    /// Best round trip to `latency.txt` in milliseconds
    async fn latency(&self, server: &SpeedtestServer) -> Option<f64> {
        let url = server.resource("latency.txt").ok()?;
        let mut best: Option<f64> = None;

        for _ in 0..LATENCY_SAMPLES {
            let start = Instant::now();
            let result = tokio::time::timeout(self.timeout, self.client.get(url.clone()).send()).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(Ok(response)) if response.status().is_success() => {
                    best = Some(best.map_or(elapsed_ms, |b| b.min(elapsed_ms)));
                }
                _ => trace!("latency probe to {url} failed"),
            }
        }
        best
    }

    #[instrument(skip_all)]
    async fn select_best(&self, candidates: Vec<SpeedtestServer>) -> anyhow::Result<(SpeedtestServer, f64)> {
        let latencies = join_all(candidates.iter().map(|server| self.latency(server))).await;

        candidates
            .into_iter()
            .zip(latencies)
            .filter_map(|(server, latency)| latency.map(|ms| (server, ms)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .context("no speedtest server responded to latency probes")
    }

    async fn download_worker(
        &self,
        server: &SpeedtestServer,
        worker: usize,
        deadline: Instant,
        received: &AtomicU64,
    ) -> anyhow::Result<()> {
        let mut index = worker;
        while Instant::now() < deadline {
            let size = DOWNLOAD_SIZES[index % DOWNLOAD_SIZES.len()];
            index += 1;

            let url = server.resource(&format!("random{size}x{size}.jpg"))?;
            let mut response = tokio::time::timeout(self.timeout, self.client.get(url).send())
                .await
                .context("timed out waiting for download")??
                .error_for_status()?;

            while let Some(chunk) = tokio::time::timeout(self.timeout, response.chunk())
                .await
                .context("timed out reading download")??
            {
                received.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                if Instant::now() >= deadline {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn download(&self, server: &SpeedtestServer, duration: Duration) -> anyhow::Result<(u64, f64)> {
        let started = Instant::now();
        let deadline = started + duration;
        let received = AtomicU64::new(0);

        let results = join_all((0..WORKERS).map(|w| self.download_worker(server, w, deadline, &received))).await;

        let bytes = received.load(Ordering::Relaxed);
        if bytes == 0 {
            let reason = results
                .into_iter()
                .find_map(Result::err)
                .map_or_else(|| "no data received".to_string(), |e| format!("{e:#}"));
            anyhow::bail!("download failed: {reason}");
        }

        Ok((bytes, elapsed_seconds(started)))
    }

    async fn upload_worker(&self, url: &Url, deadline: Instant, sent: &AtomicU64) -> anyhow::Result<()> {
        while Instant::now() < deadline {
            tokio::time::timeout(
                self.timeout,
                self.client
                    .post(url.clone())
                    .body(vec![0u8; UPLOAD_PAYLOAD_SIZE])
                    .send(),
            )
            .await
            .context("timed out uploading")??
            .error_for_status()?;

            sent.fetch_add(UPLOAD_PAYLOAD_SIZE as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn upload(&self, server: &SpeedtestServer, duration: Duration) -> Option<f64> {
        let url = match Url::parse(&server.url) {
            Ok(url) => url,
            Err(e) => {
                warn!("upload skipped, invalid server url: {e}");
                return None;
            }
        };

        let started = Instant::now();
        let deadline = started + duration;
        let sent = AtomicU64::new(0);

        let results = join_all((0..WORKERS).map(|_| self.upload_worker(&url, deadline, &sent))).await;

        let bytes = sent.load(Ordering::Relaxed);
        if bytes == 0 {
            if let Some(e) = results.into_iter().find_map(Result::err) {
                warn!("upload failed: {e:#}");
            }
            return None;
        }
        Some(mbps(bytes, elapsed_seconds(started)))
    }

    async fn run(&self, request: &MeasureRequest, started: Instant) -> anyhow::Result<Measurement> {
        let servers = candidates(self.fetch_servers().await?, request.mode)?;
        let (server, ping_ms) = self.select_best(servers).await?;
        info!(
            "selected speedtest server {:?} ({:?}), ping {ping_ms:.1}ms",
            server.display_name(),
            server.display_country()
        );

        let (bytes, download_seconds) = self.download(&server, request.duration).await?;
        let upload_mbps = self.upload(&server, request.duration).await;

        Ok(Measurement {
            duration_seconds: elapsed_seconds(started),
            bytes_downloaded: bytes,
            mbps: mbps(bytes, download_seconds),
            upload_mbps,
            ping_ms: Some(ping_ms),
            server_name: server.display_name(),
            server_country: server.display_country(),
            error: None,
        })
    }
}

#[async_trait]
impl ThroughputProbe for OoklaStrategy {
    async fn measure(&self, request: &MeasureRequest) -> Measurement {
        let started = Instant::now();
        match self.run(request, started).await {
            Ok(measurement) => measurement,
            Err(e) => {
                warn!("{} measurement failed: {e:#}", request.mode);
                Measurement::failed(format!("{e:#}"), elapsed_seconds(started))
            }
        }
    }
}
