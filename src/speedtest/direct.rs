//! Direct download (and optional upload) against a configured URL
//!
//! `ftp://` URLs are handed to [`super::ftp`]. For HTTP(S) the download streams the response body until it ends or the configured
//! duration has elapsed, whichever comes first. Every network wait is
//! bounded by the transfer timeout. Partial transfers keep their byte count
//! even when an error is recorded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use futures::stream;
use reqwest::{Body, Client};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{MeasureRequest, Measurement, ThroughputProbe, elapsed_seconds, mbps, transfer_timeout};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

static UPLOAD_CHUNK: [u8; UPLOAD_CHUNK_SIZE] = [0; UPLOAD_CHUNK_SIZE];

#[derive(Debug, Clone)]
pub struct UrlStrategy {
    client: Client,
    timeout: Duration,
}

impl UrlStrategy {
    pub fn new(timeout_seconds: f64) -> anyhow::Result<Self> {
        let timeout = transfer_timeout(timeout_seconds);
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("failed to build speed test client")?;

        Ok(Self { client, timeout })
    }

    #[instrument(skip(self))]
    async fn download(&self, url: Url, duration: Duration) -> Measurement {
        let started = Instant::now();
        let mut total: u64 = 0;

        let error = match self.stream_body(url, duration, started, &mut total).await {
            Ok(()) => None,
            Err(e) => {
                warn!("download failed after {total} bytes: {e:#}");
                Some(format!("{e:#}"))
            }
        };

        let elapsed = elapsed_seconds(started);
        Measurement {
            duration_seconds: elapsed,
            bytes_downloaded: total,
            mbps: mbps(total, elapsed),
            error,
            ..Measurement::default()
        }
    }

    async fn stream_body(
        &self,
        url: Url,
        duration: Duration,
        started: Instant,
        total: &mut u64,
    ) -> anyhow::Result<()> {
        let mut response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .context("timed out waiting for response")??
            .error_for_status()?;

        loop {
            let chunk = tokio::time::timeout(self.timeout, response.chunk())
                .await
                .context("timed out reading response body")??;
            let Some(chunk) = chunk else {
                break;
            };

            *total += chunk.len() as u64;
            if started.elapsed() >= duration {
                break;
            }
        }
        Ok(())
    }

    /// Push zeros at `url` for `duration`; `None` on any failure
    #[instrument(skip(self))]
    async fn upload(&self, url: &str, duration: Duration) -> Option<f64> {
        let started = Instant::now();
        let deadline = started + duration;
        let sent = Arc::new(AtomicU64::new(0));

        let body = stream::unfold(sent.clone(), move |sent| async move {
            if Instant::now() >= deadline {
                return None;
            }
            sent.fetch_add(UPLOAD_CHUNK_SIZE as u64, Ordering::Relaxed);
            Some((Ok::<&'static [u8], std::io::Error>(&UPLOAD_CHUNK[..]), sent))
        });

        let result = self
            .client
            .post(url)
            .timeout(duration + self.timeout)
            .body(Body::wrap_stream(body))
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                let bytes = sent.load(Ordering::Relaxed);
                let rate = mbps(bytes, elapsed_seconds(started));
                debug!("uploaded {bytes} bytes ({rate:.2} Mbps)");
                Some(rate)
            }
            Err(e) => {
                warn!("upload failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ThroughputProbe for UrlStrategy {
    async fn measure(&self, request: &MeasureRequest) -> Measurement {
        let Some(raw) = request.url.as_deref() else {
            return Measurement::failed(super::URL_NOT_SET, 0.0);
        };

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => return Measurement::failed(format!("invalid speedtest_url {raw:?}: {e}"), 0.001),
        };

        let mut measurement = match url.scheme() {
            "http" | "https" => self.download(url, request.duration).await,
            "ftp" => super::ftp::download(&url, request.duration, self.timeout).await,
            scheme => return Measurement::failed(format!("Unsupported URL scheme: {scheme}"), 0.001),
        };

        if let (None, Some(upload_url)) = (&measurement.error, request.upload_url.as_deref()) {
            measurement.upload_mbps = self.upload(upload_url, request.duration).await;
        }

        measurement
    }
}
