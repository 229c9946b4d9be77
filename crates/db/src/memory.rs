//! In-memory [`VersionedStore`] for tests and single-process development.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{DbError, Versioned, VersionedStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, DbError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn create(&self, key: &str, value: Value) -> Result<u64, DbError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Err(DbError::AlreadyExists(key.to_owned()));
        }
        entries.insert(key.to_owned(), Versioned { value, revision: 1 });
        Ok(1)
    }

    async fn update(
        &self,
        key: &str,
        value: Value,
        expected_revision: u64,
    ) -> Result<u64, DbError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key).ok_or(DbError::NotFound)?;
        if entry.revision != expected_revision {
            return Err(DbError::RevisionConflict {
                key: key.to_owned(),
                expected: expected_revision,
            });
        }
        entry.value = value;
        entry.revision += 1;
        Ok(entry.revision)
    }
}
