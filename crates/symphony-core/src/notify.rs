//! Completion notification transports.
//!
//! Fire-and-forget by design: delivery is best-effort, attempts are
//! recorded in `notification_history`, and a failed send never affects
//! the task outcome.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use symphony_db::models::Outcome;

/// What a transport needs to say about a finished task.
#[derive(Debug, Clone)]
pub struct Notification {
    pub task_id: String,
    pub summary: String,
    pub outcome: Option<Outcome>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel tag recorded in notification history (e.g. "webhook").
    fn channel(&self) -> &str;

    /// Where this transport delivers to, for the history record.
    fn target(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// POSTs the notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &str {
        "webhook"
    }

    fn target(&self) -> &str {
        &self.url
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.http
            .post(&self.url)
            .json(&json!({
                "task_id": notification.task_id,
                "summary": notification.summary,
                "outcome": notification.outcome,
            }))
            .send()
            .await
            .context("webhook notification failed")?
            .error_for_status()
            .context("webhook notification rejected")?;
        Ok(())
    }
}

/// Sends the notification through the Telegram bot API.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    http: Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            http,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &str {
        "telegram"
    }

    fn target(&self) -> &str {
        &self.chat_id
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let outcome = notification
            .outcome
            .map(|o| o.to_string())
            .unwrap_or_else(|| "failed".to_string());
        let text = format!(
            "Task {} finished ({outcome}): {}",
            notification.task_id, notification.summary
        );
        self.http
            .post(format!(
                "https://api.telegram.org/bot{}/sendMessage",
                self.bot_token
            ))
            .json(&json!({"chat_id": self.chat_id, "text": text}))
            .send()
            .await
            .context("telegram notification failed")?
            .error_for_status()
            .context("telegram notification rejected")?;
        Ok(())
    }
}
