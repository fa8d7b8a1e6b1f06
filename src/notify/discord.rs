use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use super::{NOTIFY_TIMEOUT, Outage, OutageNotifier, local_display};
use crate::config::Discord;
use crate::util::format_duration;

/// Embed accent for a completed outage
const OUTAGE_COLOR: u32 = 15158332;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: &str, value: String) -> Self {
        Self {
            name: name.to_string(),
            value,
            inline: true,
        }
    }
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Sends one embed per outage to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    discord: Discord,
    target: String,
}

impl DiscordNotifier {
    pub fn new(discord: Discord, target: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .context("failed to build Discord client")?;

        Ok(Self {
            client,
            discord,
            target: target.to_string(),
        })
    }

    pub fn build_outage_message(&self, outage: &Outage) -> Message {
        let duration = format_duration(outage.duration_seconds);

        let embed = Embed {
            title: Some("🔴 Internet Outage".to_string()),
            description: Some(format!(
                "Connectivity to **{}** was lost and has been restored.",
                self.target
            )),
            color: Some(OUTAGE_COLOR),
            fields: vec![
                EmbedField::inline("Started", local_display(outage.started_at)),
                EmbedField::inline("Ended", local_display(outage.ended_at)),
                EmbedField::inline("Duration", duration.clone()),
            ],
            timestamp: Some(Utc::now().to_rfc3339()),
        };

        let mut builder = MessageBuilder::new().add_embed(embed);
        if let Some(user_id) = &self.discord.user_id {
            builder = builder.content(format!("🔴 outage ({duration}) <@{user_id}>"));
        }
        builder.build()
    }
}

#[async_trait]
impl OutageNotifier for DiscordNotifier {
    #[instrument(skip(self, outage), fields(duration = outage.duration_seconds))]
    async fn notify_outage(&self, outage: &Outage) -> anyhow::Result<()> {
        let message = self.build_outage_message(outage);

        let response = self
            .client
            .post(&self.discord.url)
            .json(&message)
            .send()
            .await
            .context("failed to send Discord message")?;

        let status = response.status();
        if !status.is_success() {
            if let Ok(error_text) = response.text().await {
                error!("Discord API error response: {}", error_text);
            }
            anyhow::bail!("Discord message failed with status: {status}");
        }

        info!("successfully sent Discord outage message");
        Ok(())
    }
}
