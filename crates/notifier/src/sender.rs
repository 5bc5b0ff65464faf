//! Outbound send seam.
//!
//! `LogSender` simulates delivery by logging it. `WebhookSender` posts the
//! notification to an HTTP endpoint; any transport error or non-2xx status
//! counts as a transient failure for the attempter to retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use herald_common::types::{Channel, NotificationRecord};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint rejected delivery with status {status}")]
    Rejected { status: u16 },

    #[error("send failed: {0}")]
    Transient(String),
}

#[async_trait]
pub trait Sender: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError>;
}

/// Logs the notification instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError> {
        tracing::info!(
            notification_id = %record.id,
            user_id = record.user_id,
            channel = %record.channel,
            message = %record.message,
            "Sending notification"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    id: &'a str,
    user_id: i64,
    channel: Channel,
    message: &'a str,
}

/// Posts each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookSender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Sender for WebhookSender {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError> {
        let body = WebhookBody {
            id: &record.id,
            user_id: record.user_id,
            channel: record.channel,
            message: &record.message,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(notification_id = %record.id, status = status.as_u16(), "Webhook accepted notification");
        Ok(())
    }
}
