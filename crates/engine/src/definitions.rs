//! Lookup of orchestration definitions by manifest id.
//!
//! Definition CRUD lives outside the engine; the orchestrator only needs to
//! resolve a manifest id to its activity list.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::{models::OrchestrationDefinition, EngineError};

#[async_trait]
pub trait OrchestrationDefinitions: Send + Sync {
    async fn get(&self, manifest_id: &str) -> Result<Option<OrchestrationDefinition>, EngineError>;
}

/// Definitions held in a map, typically loaded from JSON files at startup.
#[derive(Debug, Default)]
pub struct InMemoryDefinitions {
    definitions: RwLock<HashMap<String, OrchestrationDefinition>>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(definitions: impl IntoIterator<Item = OrchestrationDefinition>) -> Self {
        let store = Self::new();
        for definition in definitions {
            store.insert(definition);
        }
        store
    }

    pub fn insert(&self, definition: OrchestrationDefinition) {
        self.definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(definition.id.clone(), definition);
    }

    /// Every activity type referenced by any definition.
    pub fn activity_types(&self) -> Vec<String> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut types: Vec<String> = definitions
            .values()
            .flat_map(|d| d.activities.iter().map(|a| a.activity_type.clone()))
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

#[async_trait]
impl OrchestrationDefinitions for InMemoryDefinitions {
    async fn get(&self, manifest_id: &str) -> Result<Option<OrchestrationDefinition>, EngineError> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(definitions.get(manifest_id).cloned())
    }
}
