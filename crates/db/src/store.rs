//! Versioned key/value access with compare-and-swap writes.

use async_trait::async_trait;
use serde_json::Value;

use crate::{repository::documents, DbError, DbPool};

/// A stored value together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub revision: u64,
}

/// Key/value store whose writes are conditional on a revision.
///
/// Revisions start at 1 on create and grow by one on every update.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Read the current value and revision, `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Versioned>, DbError>;

    /// Create-only write. Fails with `DbError::AlreadyExists` if the key exists.
    async fn create(&self, key: &str, value: Value) -> Result<u64, DbError>;

    /// Write if the stored revision equals `expected_revision`.
    ///
    /// Fails with `DbError::RevisionConflict` when another writer got there
    /// first, `DbError::NotFound` when the key is absent.
    async fn update(&self, key: &str, value: Value, expected_revision: u64)
        -> Result<u64, DbError>;
}

/// Postgres-backed [`VersionedStore`] over the `orchestration_documents` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionedStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, DbError> {
        let row = documents::get_document(&self.pool, key).await?;
        Ok(row.map(|r| Versioned {
            value: r.value,
            revision: r.revision as u64,
        }))
    }

    async fn create(&self, key: &str, value: Value) -> Result<u64, DbError> {
        let revision = documents::create_document(&self.pool, key, value).await?;
        Ok(revision as u64)
    }

    async fn update(
        &self,
        key: &str,
        value: Value,
        expected_revision: u64,
    ) -> Result<u64, DbError> {
        let revision =
            documents::update_document(&self.pool, key, value, expected_revision as i64).await?;
        Ok(revision as u64)
    }
}
