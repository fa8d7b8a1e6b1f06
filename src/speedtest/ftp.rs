//! Timed FTP download for `ftp://` speed test URLs
//!
//! The transfer runs on the blocking pool: login (anonymous unless the URL
//! carries credentials), binary mode, a passive `RETR`, then reads until the
//! file ends or the configured duration has elapsed. Bytes received before a
//! failure are still reported.

use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use percent_encoding::percent_decode_str;
use suppaftp::FtpStream;
use suppaftp::types::FileType;
use tracing::{debug, instrument, warn};
use url::{Host, Url};

use super::{Measurement, elapsed_seconds, mbps};

const CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

pub const MISSING_HOST: &str = "Invalid FTP URL (missing hostname)";

/// Where and as whom to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub path: String,
}

impl FtpTarget {
    /// `None` when the URL has no host
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = match url.host()? {
            Host::Domain("") => return None,
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };

        let user = match url.username() {
            "" => ANONYMOUS_USER.to_string(),
            user => unquote(user),
        };
        let password = url
            .password()
            .map(unquote)
            .unwrap_or_else(|| ANONYMOUS_PASSWORD.to_string());

        Some(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            user,
            password,
            path: unquote(url.path().trim_start_matches('/')),
        })
    }

    fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {}", self.host))?
            .next()
            .ok_or_else(|| anyhow!("no address for {}", self.host))
    }
}

fn unquote(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Download from `url` for at most `duration`, each network wait bounded by `timeout`
#[instrument(skip(url), fields(url = %url))]
pub async fn download(url: &Url, duration: Duration, timeout: Duration) -> Measurement {
    let Some(target) = FtpTarget::from_url(url) else {
        return Measurement::failed(MISSING_HOST, 0.001);
    };

    let started = Instant::now();
    let total = Arc::new(AtomicU64::new(0));

    let counter = total.clone();
    let result = tokio::task::spawn_blocking(move || retrieve(&target, duration, timeout, &counter))
        .await
        .context("ftp transfer task failed")
        .and_then(|result| result);

    let bytes = total.load(Ordering::Relaxed);
    let error = match result {
        Ok(()) => None,
        Err(e) => {
            warn!("ftp download failed after {bytes} bytes: {e:#}");
            Some(format!("{e:#}"))
        }
    };

    let elapsed = elapsed_seconds(started);
    Measurement {
        duration_seconds: elapsed,
        bytes_downloaded: bytes,
        mbps: mbps(bytes, elapsed),
        error,
        ..Measurement::default()
    }
}

fn retrieve(
    target: &FtpTarget,
    duration: Duration,
    timeout: Duration,
    total: &AtomicU64,
) -> anyhow::Result<()> {
    let started = Instant::now();

    let mut ftp = FtpStream::connect_timeout(target.socket_addr()?, timeout)
        .with_context(|| format!("failed to connect to {}:{}", target.host, target.port))?;
    ftp.get_ref().set_read_timeout(Some(timeout))?;

    ftp.login(target.user.as_str(), target.password.as_str())
        .context("ftp login failed")?;
    ftp.transfer_type(FileType::Binary)?;

    let mut data = ftp
        .retr_as_stream(target.path.as_str())
        .with_context(|| format!("RETR {} failed", target.path))?;
    data.get_ref().set_read_timeout(Some(timeout))?;

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut finished = false;
    while started.elapsed() < duration {
        let read = data.read(&mut chunk).context("ftp data read failed")?;
        if read == 0 {
            finished = true;
            break;
        }
        total.fetch_add(read as u64, Ordering::Relaxed);
    }

    // the measurement is already taken, closing errors do not change it
    let closed = if finished {
        ftp.finalize_retr_stream(data)
    } else {
        ftp.abort(data)
    };
    if let Err(e) = closed {
        debug!("ftp data connection did not close cleanly: {e}");
    }
    if let Err(e) = ftp.quit() {
        debug!("ftp quit failed: {e}");
    }

    Ok(())
}
