//! Reachability probing
//!
//! A probe answers one question per tick: can a TCP connection to the
//! target be established within the timeout? Every failure mode (DNS,
//! refusal, timeout) is reported as `is_up == false`, never as an error.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{instrument, trace};
use url::{Host, Url};

/// Host used when the configured target is empty
pub const FALLBACK_HOST: &str = "google.com";

/// Result of one reachability probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub is_up: bool,
    /// Connect latency, only present when the probe succeeded
    pub latency_ms: Option<f64>,
}

impl ProbeOutcome {
    pub fn up(latency_ms: f64) -> Self {
        Self {
            is_up: true,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn down() -> Self {
        Self {
            is_up: false,
            latency_ms: None,
        }
    }
}

/// Something that can tell whether a target is reachable right now
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, target: &str) -> ProbeOutcome;
}

/// Resolve a configured target into a host and port
///
/// - empty: [`FALLBACK_HOST`] on `default_port`
/// - bare hostname or IP: `default_port`
/// - URL form: explicit port, else 443 for `https`, 80 for `http`,
///   `default_port` for any other scheme
pub fn resolve_target(target: &str, default_port: u16) -> (String, u16) {
    let target = target.trim();
    if target.is_empty() {
        return (FALLBACK_HOST.to_string(), default_port);
    }

    if !target.contains("://") {
        return (target.to_string(), default_port);
    }

    let Ok(url) = Url::parse(target) else {
        return (target.to_string(), default_port);
    };

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        _ => return (target.to_string(), default_port),
    };

    // `Url::port` hides ports equal to the scheme default, which the
    // scheme match below restores
    let port = url.port().unwrap_or(match url.scheme() {
        "https" => 443,
        "http" => 80,
        _ => default_port,
    });

    (host, port)
}

/// TCP connect probe with a bounded timeout
#[derive(Debug, Clone)]
pub struct TcpProbe {
    default_port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(default_port: u16, timeout_seconds: f64) -> Self {
        let timeout = match Duration::try_from_secs_f64(timeout_seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => Duration::from_secs(1),
        };

        Self {
            default_port,
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    #[instrument(skip(self))]
    async fn probe(&self, target: &str) -> ProbeOutcome {
        let (host, port) = resolve_target(target, self.default_port);

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port))).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(Ok(_stream)) => {
                trace!("{host}:{port} reachable in {latency_ms:.1}ms");
                ProbeOutcome::up(latency_ms)
            }
            Ok(Err(e)) => {
                trace!("{host}:{port} unreachable: {e}");
                ProbeOutcome::down()
            }
            Err(_) => {
                trace!("{host}:{port} timed out after {:?}", self.timeout);
                ProbeOutcome::down()
            }
        }
    }
}
