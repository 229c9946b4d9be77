//! # In-Memory Activity Queue
//!
//! Thread-safe in-memory queue for tests and single-process development.
//!
//! - **Visibility Timeout**: messages become invisible after fetch, re-visible after the timeout
//! - **Delayed Nak**: a nak'ed message is hidden until its delay elapses
//! - **Publish Log**: the most recent payloads published per subject are kept for assertions

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{ActivityQueue, Delivery, QueueError};

/// In-memory message with visibility tracking
#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    payload: Value,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<Instant>,
    /// Number of times this message has been fetched
    receive_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.map(|at| at <= now).unwrap_or(true)
    }
}

/// Payloads retained per subject by the publish log.
pub const PUBLISH_LOG_CAPACITY: usize = 1_024;

#[derive(Debug, Default)]
struct StoredQueue {
    messages: VecDeque<StoredMessage>,
    /// Bounded by [`PUBLISH_LOG_CAPACITY`]; oldest entries go first.
    published: VecDeque<Value>,
    acked: usize,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, StoredQueue>,
    next_id: u64,
}

#[derive(Debug)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Messages currently held for `subject`, visible or not (for testing).
    pub fn queue_length(&self, subject: &str) -> usize {
        let inner = self.lock();
        inner
            .queues
            .get(subject)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// The last [`PUBLISH_LOG_CAPACITY`] payloads published to `subject`,
    /// oldest first (for testing).
    pub fn published(&self, subject: &str) -> Vec<Value> {
        let inner = self.lock();
        inner
            .queues
            .get(subject)
            .map(|q| q.published.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of acknowledged messages on `subject` (for testing).
    pub fn acked(&self, subject: &str) -> usize {
        let inner = self.lock();
        inner.queues.get(subject).map(|q| q.acked).unwrap_or(0)
    }

    /// Take visible messages, or report when the next hidden one reappears.
    fn try_take(
        &self,
        subject: &str,
        max_count: usize,
    ) -> Result<(Vec<Delivery>, Option<Instant>), QueueError> {
        let mut inner = self.lock();
        let queue = inner
            .queues
            .get_mut(subject)
            .ok_or_else(|| QueueError::QueueNotFound(subject.to_owned()))?;

        let now = Instant::now();
        let hidden_until = now + self.visibility_timeout;
        let mut taken = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for msg in queue.messages.iter_mut() {
            if taken.len() >= max_count {
                break;
            }
            if msg.is_visible(now) {
                msg.visible_at = Some(hidden_until);
                msg.receive_count += 1;
                taken.push(Delivery {
                    receipt: msg.id.to_string(),
                    subject: subject.to_owned(),
                    payload: msg.payload.clone(),
                    attempt: msg.receive_count,
                });
            } else if let Some(at) = msg.visible_at {
                next_visible = Some(next_visible.map_or(at, |n| n.min(at)));
            }
        }

        Ok((taken, next_visible))
    }

    fn find_position(queue: &StoredQueue, delivery: &Delivery) -> Result<usize, QueueError> {
        let id: u64 = delivery
            .receipt
            .parse()
            .map_err(|_| QueueError::InvalidReceipt(delivery.receipt.clone()))?;
        queue
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| QueueError::MessageNotFound(delivery.receipt.clone()))
    }
}

#[async_trait]
impl ActivityQueue for MemoryQueue {
    async fn ensure_queue(&self, subject: &str) -> Result<(), QueueError> {
        let mut inner = self.lock();
        inner.queues.entry(subject.to_owned()).or_default();
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Value) -> Result<(), QueueError> {
        {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            let queue = inner
                .queues
                .get_mut(subject)
                .ok_or_else(|| QueueError::QueueNotFound(subject.to_owned()))?;
            if queue.published.len() == PUBLISH_LOG_CAPACITY {
                queue.published.pop_front();
            }
            queue.published.push_back(payload.clone());
            queue.messages.push_back(StoredMessage {
                id,
                payload,
                visible_at: None,
                receive_count: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(
        &self,
        subject: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + max_wait;

        loop {
            // Register interest before looking so a concurrent publish is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (taken, next_visible) = self.try_take(subject, max_count)?;
            if !taken.is_empty() || Instant::now() >= deadline {
                return Ok(taken);
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let queue = inner
            .queues
            .get_mut(&delivery.subject)
            .ok_or_else(|| QueueError::QueueNotFound(delivery.subject.clone()))?;
        let pos = Self::find_position(queue, delivery)?;
        queue.messages.remove(pos);
        queue.acked += 1;
        Ok(())
    }

    async fn nak_with_delay(
        &self,
        delivery: &Delivery,
        delay: Duration,
    ) -> Result<(), QueueError> {
        {
            let mut inner = self.lock();
            let queue = inner
                .queues
                .get_mut(&delivery.subject)
                .ok_or_else(|| QueueError::QueueNotFound(delivery.subject.clone()))?;
            let pos = Self::find_position(queue, delivery)?;
            queue.messages[pos].visible_at = if delay.is_zero() {
                None
            } else {
                Some(Instant::now() + delay)
            };
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
