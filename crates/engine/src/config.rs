//! Tuning knobs for the engine.
//!
//! Durations are expressed in milliseconds so the structs read naturally
//! from a JSON config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds for the document compare-and-swap loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Write attempts before giving up with `UpdateConflictExhausted`.
    pub max_attempts: u32,
    /// Back-off before the first re-read; doubles per conflict.
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            base_backoff_ms: 5,
            max_backoff_ms: 500,
        }
    }
}

impl UpdateConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.base_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Consumer-loop settings, per activity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum messages taken per fetch.
    pub fetch_batch: usize,
    /// How long a fetch waits for messages.
    pub fetch_wait_ms: u64,
    /// Independent consumer loops started per activity type.
    pub consumers_per_type: usize,
    /// Pause after a failed fetch.
    pub error_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fetch_batch: 10,
            fetch_wait_ms: 1_000,
            consumers_per_type: 1,
            error_backoff_ms: 1_000,
        }
    }
}

impl ExecutorConfig {
    pub fn fetch_wait(&self) -> Duration {
        Duration::from_millis(self.fetch_wait_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Everything a worker process needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub update: UpdateConfig,
    pub queue: QueueConfig,
}

/// Settings for the queue implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a fetched message stays hidden before redelivery.
    pub visibility_timeout_ms: u64,
    /// Polling interval for table-backed queues.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
