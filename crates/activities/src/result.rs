//! Outcome of a single processor invocation.

use std::time::Duration;

use crate::ActivityError;

/// What a processor wants the engine to do after an invocation.
///
/// The variants are closed on purpose: the executor matches on every one of
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityResult {
    /// The activity finished; the orchestration may advance.
    Complete,
    /// Same as `Complete`.
    Continue,
    /// Suspend without rescheduling; an external trigger resumes the activity.
    Wait,
    /// Suspend and redeliver the same message after the delay.
    Schedule(Duration),
    /// Transient failure; redeliver the message.
    RetryError(String),
    /// Permanent failure; abort the orchestration.
    FatalError(String),
}

impl ActivityResult {
    pub fn retry(message: impl Into<String>) -> Self {
        Self::RetryError(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalError(message.into())
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Continue => "continue",
            Self::Wait => "wait",
            Self::Schedule(_) => "schedule",
            Self::RetryError(_) => "retry_error",
            Self::FatalError(_) => "fatal_error",
        }
    }
}

impl From<ActivityError> for ActivityResult {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::Retryable(msg) => Self::RetryError(msg),
            ActivityError::Fatal(msg) => Self::FatalError(msg),
        }
    }
}

/// Unclassified errors fail closed.
impl From<anyhow::Error> for ActivityResult {
    fn from(err: anyhow::Error) -> Self {
        Self::FatalError(format!("{err:#}"))
    }
}

impl From<Result<ActivityResult, ActivityError>> for ActivityResult {
    fn from(outcome: Result<ActivityResult, ActivityError>) -> Self {
        outcome.unwrap_or_else(Into::into)
    }
}
