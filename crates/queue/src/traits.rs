//! The `ActivityQueue` trait and the message type it hands out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::QueueError;

/// One delivery of a queued message.
///
/// The same message may be delivered many times; `attempt` counts the
/// deliveries so far, starting at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Receipt used to ack or nak this delivery.
    pub receipt: String,
    pub subject: String,
    pub payload: Value,
    pub attempt: u32,
}

impl Delivery {
    /// Decode the payload into a typed envelope.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Durable queue with at-least-once delivery and explicit acknowledgement.
///
/// A fetched message is hidden from other consumers for the implementation's
/// visibility timeout. If it is neither acked nor nak'ed in that window it
/// becomes deliverable again.
#[async_trait]
pub trait ActivityQueue: Send + Sync {
    /// Create the queue for `subject` if it doesn't exist (idempotent).
    async fn ensure_queue(&self, subject: &str) -> Result<(), QueueError>;

    async fn publish(&self, subject: &str, payload: Value) -> Result<(), QueueError>;

    /// Wait up to `max_wait` for at least one deliverable message and return
    /// at most `max_count` of them. An empty vector means the wait elapsed.
    async fn fetch(
        &self,
        subject: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Processing finished; never deliver this message again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Redeliver as soon as possible.
    async fn nak(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.nak_with_delay(delivery, Duration::ZERO).await
    }

    /// Redeliver once `delay` has elapsed.
    async fn nak_with_delay(&self, delivery: &Delivery, delay: Duration)
        -> Result<(), QueueError>;
}

/// Serialize `message` as JSON and publish it.
pub async fn publish_message<T: Serialize + Sync>(
    queue: &dyn ActivityQueue,
    subject: &str,
    message: &T,
) -> Result<(), QueueError> {
    let payload = serde_json::to_value(message)?;
    queue.publish(subject, payload).await
}
