//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Publish or fetch against a subject that was never provisioned.
    #[error("queue not found: '{0}'")]
    QueueNotFound(String),

    /// Ack/nak for a message the queue no longer holds.
    #[error("message not found: '{0}'")]
    MessageNotFound(String),

    #[error("invalid receipt handle: '{0}'")]
    InvalidReceipt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
