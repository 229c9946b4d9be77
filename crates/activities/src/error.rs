//! Activity-level error type.

use thiserror::Error;

/// Errors a processor can raise with `?` instead of building an
/// [`ActivityResult`](crate::ActivityResult) by hand.
///
/// The engine uses the variant to decide redelivery behaviour:
/// - `Retryable` — the message is negatively acknowledged and redelivered.
/// - `Fatal`     — the orchestration is marked as errored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// Transient failure; the message should be redelivered.
    #[error("retryable activity error: {0}")]
    Retryable(String),

    /// Permanent failure; the orchestration is aborted.
    #[error("fatal activity error: {0}")]
    Fatal(String),
}
