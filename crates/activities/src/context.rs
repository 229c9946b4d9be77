//! Per-invocation activity context.
//!
//! The context is rebuilt from the freshly read orchestration document on
//! every delivery and thrown away afterwards. The writes it accumulates
//! ([`ContextChanges`]) are the only way a processor affects durable state.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Key/value data carried on an orchestration document.
pub type DataMap = BTreeMap<String, Value>;

/// Writes recorded during one invocation.
///
/// Applying the same change set twice yields the same maps, so it is safe to
/// re-apply on top of a re-read document after a revision conflict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextChanges {
    pub processing: DataMap,
    pub output: DataMap,
}

impl ContextChanges {
    pub fn is_empty(&self) -> bool {
        self.processing.is_empty() && self.output.is_empty()
    }

    /// Merge the recorded writes into the given maps.
    pub fn apply_to(&self, processing: &mut DataMap, output: &mut DataMap) {
        for (key, value) in &self.processing {
            processing.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.output {
            output.insert(key.clone(), value.clone());
        }
    }
}

/// Shared context passed to a processor for one invocation.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    activity_id: String,
    orchestration_id: String,
    inputs: DataMap,
    processing: DataMap,
    output: DataMap,
    changes: ContextChanges,
}

impl ActivityContext {
    /// Build a context from document snapshots.
    pub fn new(
        activity_id: impl Into<String>,
        orchestration_id: impl Into<String>,
        inputs: DataMap,
        processing: DataMap,
        output: DataMap,
    ) -> Self {
        Self {
            activity_id: activity_id.into(),
            orchestration_id: orchestration_id.into(),
            inputs,
            processing,
            output,
            changes: ContextChanges::default(),
        }
    }

    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    pub fn orchestration_id(&self) -> &str {
        &self.orchestration_id
    }

    /// Read-only input view (orchestration input plus mapped values).
    pub fn inputs(&self) -> &DataMap {
        &self.inputs
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// Deserialize an input value, `None` if absent or of the wrong shape.
    pub fn input_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.input(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Processing value, preferring writes made during this invocation.
    pub fn processing(&self, key: &str) -> Option<&Value> {
        self.changes
            .processing
            .get(key)
            .or_else(|| self.processing.get(key))
    }

    pub fn processing_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.processing(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_processing(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.changes.processing.insert(key.into(), value.into());
    }

    /// Output value, preferring writes made during this invocation.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.changes.output.get(key).or_else(|| self.output.get(key))
    }

    pub fn set_output(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.changes.output.insert(key.into(), value.into());
    }

    pub fn changes(&self) -> &ContextChanges {
        &self.changes
    }

    pub fn into_changes(self) -> ContextChanges {
        self.changes
    }
}
