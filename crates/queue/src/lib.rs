//! # Output queue
//!
//! Hands submitted filter outputs to the downstream processing pipeline.
//!
//! The producer side ([`ChannelProducer`]) writes a [`SubmissionMessage`]
//! onto a bounded channel. A full channel applies back-pressure; the
//! producer waits at most its configured send timeout before reporting
//! [`QueueError::Timeout`]. A single [`relay`] task drains the channel in
//! send order and delivers each message to a [`MessageSink`].
//!
//! Delivery is at-least-once from the producer's point of view: a message
//! accepted by the channel is handed to the sink exactly once, and sink
//! failures are logged rather than retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod sink;

pub use sink::{LogSink, MessageSink, WebhookSink};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("submission queue is closed")]
    Closed,

    #[error("submission queue full for {0:?}")]
    Timeout(Duration),

    #[error("failed to encode submission message: {0}")]
    Serialization(String),

    #[error("failed to deliver submission message: {0}")]
    Delivery(String),
}

/// Payload naming the output a worker should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMessage {
    pub filter_output_id: String,
}

/// A message together with the topic it was produced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub message: SubmissionMessage,
}

impl Envelope {
    pub fn to_json(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(&self.message).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Asynchronous dispatch of submitted outputs.
#[async_trait]
pub trait OutputQueue: Send + Sync {
    async fn enqueue(&self, output_id: &str) -> Result<(), QueueError>;
}

/// Single-producer handle onto the submission channel.
#[derive(Clone)]
pub struct ChannelProducer {
    topic: String,
    sender: mpsc::Sender<Envelope>,
    send_timeout: Duration,
}

/// Create a bounded submission channel.
pub fn channel(
    topic: impl Into<String>,
    capacity: usize,
    send_timeout: Duration,
) -> (ChannelProducer, mpsc::Receiver<Envelope>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ChannelProducer {
            topic: topic.into(),
            sender,
            send_timeout,
        },
        receiver,
    )
}

impl ChannelProducer {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl OutputQueue for ChannelProducer {
    async fn enqueue(&self, output_id: &str) -> Result<(), QueueError> {
        let envelope = Envelope {
            topic: self.topic.clone(),
            message: SubmissionMessage {
                filter_output_id: output_id.to_string(),
            },
        };
        match tokio::time::timeout(self.send_timeout, self.sender.send(envelope)).await {
            Ok(Ok(())) => {
                debug!(topic = %self.topic, filter_output_id = output_id, "Enqueued submission");
                Ok(())
            }
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout(self.send_timeout)),
        }
    }
}

/// Drain `receiver` until every producer is dropped, delivering in order.
///
/// Returns the number of messages delivered successfully.
pub async fn relay(mut receiver: mpsc::Receiver<Envelope>, sink: &dyn MessageSink) -> usize {
    info!("Submission relay started");
    let mut delivered = 0;
    while let Some(envelope) = receiver.recv().await {
        match sink.deliver(&envelope).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                topic = %envelope.topic,
                filter_output_id = %envelope.message.filter_output_id,
                error = %e,
                "Submission delivery failed"
            ),
        }
    }
    info!(delivered, "Submission relay stopped");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl MessageSink for Recorder {
        async fn deliver(&self, envelope: &Envelope) -> Result<(), QueueError> {
            if self.fail_on.as_deref() == Some(envelope.message.filter_output_id.as_str()) {
                return Err(QueueError::Delivery("rejected".into()));
            }
            self.seen
                .lock()
                .unwrap()
                .push(envelope.message.filter_output_id.clone());
            Ok(())
        }
    }

    #[test]
    fn payload_wire_shape() {
        let envelope = Envelope {
            topic: "filter-job-submitted".into(),
            message: SubmissionMessage {
                filter_output_id: "o-1".into(),
            },
        };
        assert_eq!(envelope.to_json().unwrap(), br#"{"filter_output_id":"o-1"}"#);
    }

    #[tokio::test]
    async fn relay_preserves_send_order() {
        let (producer, receiver) = channel("topic", 8, Duration::from_secs(1));
        for id in ["a", "b", "c"] {
            producer.enqueue(id).await.unwrap();
        }
        drop(producer);

        let recorder = Recorder::default();
        let delivered = relay(receiver, &recorder).await;
        assert_eq!(delivered, 3);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn relay_continues_after_sink_failure() {
        let (producer, receiver) = channel("topic", 8, Duration::from_secs(1));
        for id in ["a", "b", "c"] {
            producer.enqueue(id).await.unwrap();
        }
        drop(producer);

        let recorder = Recorder {
            fail_on: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(relay(receiver, &recorder).await, 2);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn full_queue_times_out() {
        let (producer, _receiver) = channel("topic", 1, Duration::from_millis(20));
        producer.enqueue("first").await.unwrap();
        assert_eq!(
            producer.enqueue("second").await,
            Err(QueueError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (producer, receiver) = channel("topic", 1, Duration::from_millis(20));
        drop(receiver);
        assert_eq!(producer.enqueue("o-1").await, Err(QueueError::Closed));
    }
}
