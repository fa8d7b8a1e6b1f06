use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, instrument};

use super::{NOTIFY_TIMEOUT, Outage, OutageNotifier, local_display};
use crate::config::Webhook;
use crate::util::format_duration;

/// Posts a generic JSON document per outage
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Webhook,
    target: String,
}

impl WebhookNotifier {
    pub fn new(webhook: Webhook, target: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .context("failed to build webhook client")?;

        Ok(Self {
            client,
            webhook,
            target: target.to_string(),
        })
    }

    fn format_message(&self, outage: &Outage) -> String {
        format!(
            "🔴 **Internet outage** on `{}`: down from {} until {} ({})",
            self.target,
            local_display(outage.started_at),
            local_display(outage.ended_at),
            format_duration(outage.duration_seconds)
        )
    }
}

#[async_trait]
impl OutageNotifier for WebhookNotifier {
    #[instrument(skip(self, outage), fields(duration = outage.duration_seconds))]
    async fn notify_outage(&self, outage: &Outage) -> anyhow::Result<()> {
        let payload = json!({
            "message": self.format_message(outage),
            "target": self.target,
            "started_at": outage.started_at.to_rfc3339(),
            "ended_at": outage.ended_at.to_rfc3339(),
            "duration_seconds": outage.duration_seconds,
        });

        let response = self
            .client
            .post(&self.webhook.url)
            .json(&payload)
            .send()
            .await
            .context("failed to send webhook notification")?;

        if !response.status().is_success() {
            anyhow::bail!("webhook notification failed with status: {}", response.status());
        }

        info!("successfully sent outage webhook notification");
        Ok(())
    }
}
