//! Built-in delivery handlers.
//!
//! - `LoggingHandler`: records the delivery for a named channel and reports success.
//!   Stands in for channels whose transport lives outside this crate (browser
//!   push socket, email relay).
//! - `WebhookHandler`: POSTs the task as JSON to an HTTP endpoint.

use async_trait::async_trait;

use courier_common::types::NotificationTask;

use crate::registry::NotificationHandler;

/// Handler that logs the notification and reports it as delivered.
pub struct LoggingHandler {
    channel: String,
}

impl LoggingHandler {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl NotificationHandler for LoggingHandler {
    async fn deliver(&self, task: &NotificationTask) -> anyhow::Result<bool> {
        tracing::info!(
            channel = %self.channel,
            task_id = %task.id,
            recipient_id = %task.recipient_id,
            title = %task.title,
            "Sending notification"
        );
        Ok(true)
    }
}

/// Handler that delivers a notification as an HTTP POST with a JSON body.
///
/// Any 2xx response counts as delivered; other statuses are a failed attempt
/// and transport errors are returned as-is.
pub struct WebhookHandler {
    client: reqwest::Client,
    url: String,
}

impl WebhookHandler {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationHandler for WebhookHandler {
    async fn deliver(&self, task: &NotificationTask) -> anyhow::Result<bool> {
        let response = self.client.post(&self.url).json(task).send().await?;
        let status = response.status();

        if !status.is_success() {
            tracing::warn!(
                task_id = %task.id,
                url = %self.url,
                status = status.as_u16(),
                "Webhook rejected notification"
            );
        }

        Ok(status.is_success())
    }
}
