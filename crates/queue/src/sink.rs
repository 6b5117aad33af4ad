use crate::{Envelope, QueueError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Final destination of relayed submission messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), QueueError>;
}

/// Logs each message. Used when no downstream endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), QueueError> {
        info!(
            topic = %envelope.topic,
            filter_output_id = %envelope.message.filter_output_id,
            "Filter submission ready for processing"
        );
        Ok(())
    }
}

/// POSTs each message as JSON to a downstream endpoint.
///
/// The topic travels in the `X-Topic` header.
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let response = self
            .client
            .post(&self.url)
            .header("X-Topic", envelope.topic.as_str())
            .json(&envelope.message)
            .send()
            .await
            .map_err(|e| QueueError::Delivery(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(QueueError::Delivery(format!("webhook returned {status}")))
        }
    }
}
