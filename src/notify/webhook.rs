use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::Notifier;
use crate::config::{NotificationsConfig, WebhookFormat};
use crate::models::TenderRecord;
use crate::utils::error::NotifyError;

const SLACK_MAX_LEN: usize = 2900;
const DISCORD_MAX_LEN: usize = 2000;
const DESCRIPTION_SNIPPET_LEN: usize = 160;

pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    format: WebhookFormat,
    username: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>, format: WebhookFormat, username: impl Into<String>) -> Self {
        WebhookNotifier {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url: webhook_url.into(),
            format,
            username: username.into(),
        }
    }

    /// `None` when no webhook is configured.
    pub fn from_config(config: &NotificationsConfig) -> Option<Self> {
        config
            .webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.format, config.username.clone()))
    }

    fn max_len(&self) -> usize {
        match self.format {
            WebhookFormat::Slack => SLACK_MAX_LEN,
            WebhookFormat::Discord => DISCORD_MAX_LEN,
        }
    }

    fn format_line(&self, record: &TenderRecord) -> String {
        let mut line = match self.format {
            WebhookFormat::Slack => format!("• <{}|{}>", record.url, record.summary()),
            WebhookFormat::Discord => format!("• [{}]({})", record.summary(), record.url),
        };
        if let Some(buyer) = &record.buyer {
            line.push_str(&format!(", {}", buyer));
        }
        if let Some(description) = &record.description {
            line.push_str(&format!("\n    {}", truncate(description, DESCRIPTION_SNIPPET_LEN)));
        }
        line
    }

    pub fn format_message(&self, source: &str, records: &[TenderRecord]) -> String {
        let header = match self.format {
            WebhookFormat::Slack => format!("*{} new tender(s) from {}*", records.len(), source),
            WebhookFormat::Discord => format!("**{} new tender(s) from {}**", records.len(), source),
        };

        let mut lines = vec![header];
        lines.extend(records.iter().map(|r| self.format_line(r)));
        truncate(&lines.join("\n"), self.max_len())
    }

    pub fn create_webhook_payload(&self, message: String) -> serde_json::Value {
        match self.format {
            WebhookFormat::Slack => json!({ "text": message, "username": self.username }),
            WebhookFormat::Discord => json!({ "content": message, "username": self.username }),
        }
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        match self.format {
            WebhookFormat::Slack => "slack-webhook",
            WebhookFormat::Discord => "discord-webhook",
        }
    }

    async fn notify(&self, source: &str, records: &[TenderRecord]) -> Result<(), NotifyError> {
        if records.is_empty() {
            return Ok(());
        }

        let payload = self.create_webhook_payload(self.format_message(source, records));
        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
