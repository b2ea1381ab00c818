//! Best-effort operator alerts on Slack, deduplicated by message text.

use crate::metrics_defs::{ALERT_SENT, ALERT_SUPPRESSED};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum AlertError {
    #[error("alert request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("alert target returned status {0}")]
    Status(StatusCode),
    #[error("alert delivery timed out")]
    Timeout,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum AlertTarget {
    /// Slack incoming webhook.
    Webhook { url: String },
    /// Slack bot token posting to a channel.
    Bot { token: String, channel: String },
}

/// Remembers when each message was last sent and suppresses repeats inside
/// the window.
pub struct Deduplicator {
    window: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Deduplicator::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Deduplicator {
            window,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and records `text` unless it was sent inside the window.
    pub fn should_send(&self, text: &str) -> bool {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();
        last_sent.retain(|_, sent_at| now.duration_since(*sent_at) < self.window);

        if last_sent.contains_key(text) {
            return false;
        }
        last_sent.insert(text.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.last_sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct Alerter {
    client: reqwest::Client,
    target: AlertTarget,
    bot_api_url: String,
    dedup: Arc<Deduplicator>,
}

impl Alerter {
    pub fn new(target: AlertTarget, dedup: Arc<Deduplicator>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(ALERT_TIMEOUT).build()?;

        Ok(Alerter {
            client,
            target,
            bot_api_url: SLACK_POST_MESSAGE_URL.to_string(),
            dedup,
        })
    }

    /// Overrides the Slack API endpoint used by bot targets.
    pub fn with_bot_api_url(mut self, url: &str) -> Self {
        self.bot_api_url = url.to_string();
        self
    }

    /// Delivers `text` unless it is a duplicate. Returns whether anything was
    /// sent.
    pub async fn send(&self, text: &str) -> Result<bool, AlertError> {
        if text.is_empty() {
            return Ok(false);
        }
        if !self.dedup.should_send(text) {
            counter!(ALERT_SUPPRESSED).increment(1);
            return Ok(false);
        }

        tokio::time::timeout(ALERT_TIMEOUT, self.deliver(text))
            .await
            .map_err(|_| AlertError::Timeout)??;

        counter!(ALERT_SENT).increment(1);
        Ok(true)
    }

    async fn deliver(&self, text: &str) -> Result<(), AlertError> {
        let request = match &self.target {
            AlertTarget::Webhook { url } => self
                .client
                .post(url)
                .json(&serde_json::json!({ "text": text })),
            AlertTarget::Bot { token, channel } => self
                .client
                .post(&self.bot_api_url)
                .bearer_auth(token)
                .json(&serde_json::json!({ "channel": channel, "text": text })),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status));
        }
        Ok(())
    }

    /// Fire-and-forget: delivery runs on its own task and failures are only
    /// logged.
    pub fn notify(&self, text: String) {
        let alerter = self.clone();
        tokio::spawn(async move {
            if let Err(err) = alerter.send(&text).await {
                tracing::warn!(error = %err, "failed to deliver alert");
            }
        });
    }
}
