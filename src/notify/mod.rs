//! Outage notifications
//!
//! The connectivity monitor hands every completed outage that lasted at
//! least `min_outage_seconds` to an [`OutageNotifier`]. Delivery is best
//! effort: errors are returned to the caller, which logs and drops them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::config::{NotifyConfig, NotifySink};

pub mod discord;
pub mod webhook;

pub use discord::DiscordNotifier;
pub use webhook::WebhookNotifier;

/// Upper bound for a single notification request
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// A completed outage, from the flip to `Down` until the flip back to `Up`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outage {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl Outage {
    pub fn new(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        let duration_seconds = (ended_at - started_at).num_milliseconds() as f64 / 1000.0;
        Self {
            started_at,
            ended_at,
            duration_seconds,
        }
    }
}

/// Render a timestamp in the host's local time without offset
pub fn local_display(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[async_trait]
pub trait OutageNotifier: Send + Sync {
    async fn notify_outage(&self, outage: &Outage) -> anyhow::Result<()>;
}

/// Build the configured sink, if any
///
/// `target` names the monitored path in the rendered messages.
pub fn from_config(
    config: &NotifyConfig,
    target: &str,
) -> anyhow::Result<Option<Arc<dyn OutageNotifier>>> {
    let notifier: Arc<dyn OutageNotifier> = match &config.sink {
        None => return Ok(None),
        Some(NotifySink::Webhook(webhook)) => Arc::new(WebhookNotifier::new(webhook.clone(), target)?),
        Some(NotifySink::Discord(discord)) => Arc::new(DiscordNotifier::new(discord.clone(), target)?),
    };
    Ok(Some(notifier))
}
