//! Engine-level error types.

use thiserror::Error;

/// How the caller should treat an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; surfaced to the caller, never retried.
    Client,
    /// Transient; the message is redelivered.
    Recoverable,
    /// Permanent; the orchestration is (or should be) errored.
    Fatal,
}

/// Errors produced by the orchestration engine (instantiation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Instantiation errors ------

    /// Two or more activities share the same ID.
    #[error("duplicate activity ID: '{0}'")]
    DuplicateActivityId(String),

    /// A `depends_on` entry names an activity that doesn't exist.
    #[error("activity '{activity_id}' depends on unknown activity '{dependency}'")]
    DependencyNotFound {
        activity_id: String,
        dependency: String,
    },

    /// Leveling could not consume the graph.
    #[error("dependency cycle detected through: {}", vertices.join(" -> "))]
    CycleDetected { vertices: Vec<String> },

    /// Every step is empty.
    #[error("orchestration '{0}' has no activities to run")]
    EmptyOrchestration(String),

    #[error("no orchestration definition registered for '{0}'")]
    DefinitionNotFound(String),

    /// A queued message could not be decoded or does not fit its document.
    #[error("invalid activity message: {0}")]
    InvalidMessage(String),

    // ------ Execution errors ------

    #[error("orchestration document '{0}' not found")]
    DocumentNotFound(String),

    /// The processor asked for redelivery.
    #[error("activity '{activity_id}' failed, will retry: {message}")]
    ActivityRetry {
        activity_id: String,
        message: String,
    },

    /// The processor failed permanently; the orchestration is errored.
    #[error("activity '{activity_id}' failed fatally: {message}")]
    ActivityFatal {
        activity_id: String,
        message: String,
    },

    /// The compare-and-swap loop ran out of attempts.
    #[error("gave up updating document '{key}' after {attempts} conflicting writes")]
    UpdateConflictExhausted { key: String, attempts: u32 },

    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// Messaging error from the queue crate.
    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateActivityId(_)
            | Self::DependencyNotFound { .. }
            | Self::CycleDetected { .. }
            | Self::EmptyOrchestration(_)
            | Self::DefinitionNotFound(_)
            | Self::InvalidMessage(_) => ErrorKind::Client,

            Self::ActivityRetry { .. } | Self::Queue(_) => ErrorKind::Recoverable,
            Self::Database(db::DbError::Sqlx(_)) => ErrorKind::Recoverable,
            Self::Database(err) if err.is_conflict() => ErrorKind::Recoverable,

            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Recoverable
    }
}
