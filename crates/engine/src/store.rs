//! Typed access to orchestration documents and the optimistic update protocol.

use std::sync::Arc;

use chrono::Utc;
use db::{DbError, VersionedStore};
use tracing::{debug, warn};

use crate::{config::UpdateConfig, models::OrchestrationDocument, EngineError};

/// Result of a create-only write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { revision: u64 },
    /// Another writer created the document first.
    AlreadyExists,
}

/// Orchestration documents on top of a [`VersionedStore`].
#[derive(Clone)]
pub struct DocumentStore {
    store: Arc<dyn VersionedStore>,
    config: UpdateConfig,
}

impl DocumentStore {
    pub fn new(store: Arc<dyn VersionedStore>, config: UpdateConfig) -> Self {
        Self { store, config }
    }

    /// Read a document and the revision it was read at.
    pub async fn get(&self, id: &str) -> Result<Option<(OrchestrationDocument, u64)>, EngineError> {
        match self.store.get(id).await? {
            Some(entry) => {
                let doc: OrchestrationDocument = serde_json::from_value(entry.value)?;
                Ok(Some((doc, entry.revision)))
            }
            None => Ok(None),
        }
    }

    /// Create-only write of a new document.
    pub async fn create(&self, doc: &OrchestrationDocument) -> Result<CreateOutcome, EngineError> {
        let value = serde_json::to_value(doc)?;
        match self.store.create(&doc.id, value).await {
            Ok(revision) => Ok(CreateOutcome::Created { revision }),
            Err(DbError::AlreadyExists(_)) => Ok(CreateOutcome::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply `mutator` to `doc` and write it back if the stored revision is
    /// still `revision`.
    ///
    /// On a conflict the document is re-read and `mutator` is applied again
    /// to the fresh copy, so it must derive everything it changes from the
    /// document it is handed. Gives up with
    /// [`EngineError::UpdateConflictExhausted`] after
    /// `UpdateConfig::max_attempts` writes.
    pub async fn update<F>(
        &self,
        doc: &OrchestrationDocument,
        revision: u64,
        mutator: F,
    ) -> Result<(OrchestrationDocument, u64), EngineError>
    where
        F: Fn(&mut OrchestrationDocument) + Send + Sync,
    {
        let mut base = doc.clone();
        let mut expected = revision;
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let mut working = base.clone();
            mutator(&mut working);
            working.updated_at = Utc::now();

            let value = serde_json::to_value(&working)?;
            match self.store.update(&working.id, value, expected).await {
                Ok(new_revision) => return Ok((working, new_revision)),
                Err(DbError::RevisionConflict { .. }) => {
                    debug!(
                        orchestration_id = %doc.id,
                        attempt,
                        expected,
                        "revision conflict, re-reading document"
                    );
                    if attempt == attempts {
                        break;
                    }
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                    let (fresh, fresh_revision) = self
                        .get(&doc.id)
                        .await?
                        .ok_or_else(|| EngineError::DocumentNotFound(doc.id.clone()))?;
                    base = fresh;
                    expected = fresh_revision;
                }
                Err(DbError::NotFound) => return Err(EngineError::DocumentNotFound(doc.id.clone())),
                Err(err) => return Err(err.into()),
            }
        }

        warn!(orchestration_id = %doc.id, attempts, "document update exhausted its attempts");
        Err(EngineError::UpdateConflictExhausted {
            key: doc.id.clone(),
            attempts,
        })
    }
}
