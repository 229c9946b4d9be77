//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    /// A create-only write found an existing key.
    #[error("key '{0}' already exists")]
    AlreadyExists(String),

    /// A compare-and-swap write found a different revision than expected.
    #[error("revision conflict on '{key}': expected {expected}")]
    RevisionConflict { key: String, expected: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// `true` for the two outcomes of a lost compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::RevisionConflict { .. })
    }
}
