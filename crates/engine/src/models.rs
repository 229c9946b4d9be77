//! Core domain models for the orchestration engine.
//!
//! These types are the source of truth for what an orchestration looks like
//! in memory. The [`OrchestrationDocument`] is serialised as JSON into the
//! versioned document store; [`ActivityMessage`] and
//! [`OrchestrationResponse`] travel over the queues.

use std::collections::BTreeSet;

use activities::{ContextChanges, DataMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Makes the value stored under `source` visible as `target` in an
/// activity's input view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMapping {
    pub source: String,
    pub target: String,
}

/// A single unit of provisioning work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Unique identifier within the orchestration (referenced by `depends_on`).
    pub id: String,
    /// Selects the queue and the registered `ActivityProcessor`.
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<InputMapping>,
}

impl Activity {
    /// Convenience constructor for definitions built in code.
    pub fn new(id: impl Into<String>, activity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity_type: activity_type.into(),
            depends_on: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_input(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.inputs.push(InputMapping {
            source: source.into(),
            target: target.into(),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Activities with no dependency among themselves, eligible to run in parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub activities: Vec<Activity>,
}

impl Step {
    pub fn contains(&self, activity_id: &str) -> bool {
        self.activities.iter().any(|a| a.id == activity_id)
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.activities.iter().map(|a| a.id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// OrchestrationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    #[default]
    Initialized,
    Running,
    Completed,
    Errored,
}

impl OrchestrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestrationDocument
// ---------------------------------------------------------------------------

/// Durable record of one in-flight orchestration.
///
/// Only ever changed through [`DocumentStore::update`](crate::store::DocumentStore::update).
/// `completed` only grows and `state` only moves forward; the `mark_*`
/// methods below are the sole writers of both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationDocument {
    pub id: String,
    pub correlation_id: String,
    /// Definition this orchestration was built from.
    pub orchestration_type: String,
    pub state: OrchestrationState,
    pub steps: Vec<Step>,
    pub input_data: DataMap,
    #[serde(default)]
    pub processing_data: DataMap,
    #[serde(default)]
    pub output_data: DataMap,
    #[serde(default)]
    pub completed: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationDocument {
    pub fn new(
        id: impl Into<String>,
        correlation_id: impl Into<String>,
        orchestration_type: impl Into<String>,
        steps: Vec<Step>,
        input_data: DataMap,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            correlation_id: correlation_id.into(),
            orchestration_type: orchestration_type.into(),
            state: OrchestrationState::Initialized,
            steps,
            input_data,
            processing_data: DataMap::new(),
            output_data: DataMap::new(),
            completed: BTreeSet::new(),
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_index_of(&self, activity_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.contains(activity_id))
    }

    /// Index of the first step that has at least one activity.
    pub fn first_runnable_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_empty())
    }

    /// Index of the first non-empty step after `step`.
    pub fn next_runnable_step(&self, step: usize) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(step + 1)
            .find(|(_, s)| !s.is_empty())
            .map(|(i, _)| i)
    }

    /// `true` when `activity_id` belongs to the last non-empty step.
    pub fn in_final_step(&self, activity_id: &str) -> bool {
        self.step_index_of(activity_id)
            .is_some_and(|step| self.next_runnable_step(step).is_none())
    }

    pub fn is_completed(&self, activity_id: &str) -> bool {
        self.completed.contains(activity_id)
    }

    /// `true` when every other activity in `activity_id`'s step has completed.
    pub fn can_proceed(&self, activity_id: &str) -> bool {
        match self.step_index_of(activity_id) {
            Some(i) => self.steps[i]
                .activities
                .iter()
                .filter(|a| a.id != activity_id)
                .all(|a| self.completed.contains(&a.id)),
            None => false,
        }
    }

    /// Input view for one activity: orchestration input plus its mappings.
    ///
    /// A mapping's source is looked up in processing data first, then in
    /// input data; absent sources are skipped.
    pub fn activity_inputs(&self, activity: &Activity) -> DataMap {
        let mut inputs = self.input_data.clone();
        for mapping in &activity.inputs {
            let value = self
                .processing_data
                .get(&mapping.source)
                .or_else(|| self.input_data.get(&mapping.source));
            if let Some(value) = value {
                inputs.insert(mapping.target.clone(), value.clone());
            }
        }
        inputs
    }

    /// Merge an invocation's writes and leave `Initialized`.
    pub fn apply_changes(&mut self, changes: &ContextChanges) {
        changes.apply_to(&mut self.processing_data, &mut self.output_data);
        self.mark_running();
    }

    pub fn mark_running(&mut self) {
        if self.state == OrchestrationState::Initialized {
            self.state = OrchestrationState::Running;
        }
    }

    pub fn mark_completed(&mut self, activity_id: &str) {
        self.completed.insert(activity_id.to_owned());
        self.mark_running();
    }

    /// No-op once the orchestration is terminal.
    pub fn mark_errored(&mut self, detail: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = OrchestrationState::Errored;
            self.error_detail = Some(detail.into());
        }
    }

    /// No-op once the orchestration is terminal.
    pub fn mark_finished(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrchestrationState::Completed;
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions and requests
// ---------------------------------------------------------------------------

/// Static description of an orchestration type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationDefinition {
    pub id: String,
    pub activities: Vec<Activity>,
}

/// A client's request to run an orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Orchestration id; repeated requests with the same id are deduplicated.
    pub id: String,
    /// Which [`OrchestrationDefinition`] to run.
    pub manifest_id: String,
    pub correlation_id: String,
    /// Becomes the document's `input_data`.
    #[serde(default)]
    pub properties: DataMap,
}

// ---------------------------------------------------------------------------
// Queue payloads
// ---------------------------------------------------------------------------

/// Envelope carried on an activity queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMessage {
    pub orchestration_id: String,
    pub activity: Activity,
}

/// Published to the response subject when an orchestration ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResponse {
    pub id: String,
    pub manifest_id: String,
    pub correlation_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Final `output_data`.
    pub properties: DataMap,
}

impl OrchestrationResponse {
    pub fn from_document(doc: &OrchestrationDocument) -> Self {
        Self {
            id: doc.id.clone(),
            manifest_id: doc.orchestration_type.clone(),
            correlation_id: doc.correlation_id.clone(),
            success: doc.state == OrchestrationState::Completed,
            error_detail: doc.error_detail.clone(),
            properties: doc.output_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> OrchestrationDocument {
        let steps = vec![
            Step {
                activities: vec![Activity::new("a", "t"), Activity::new("b", "t")],
            },
            Step::default(),
            Step {
                activities: vec![Activity::new("c", "t").depends_on(["a", "b"])],
            },
        ];
        let mut input = DataMap::new();
        input.insert("zone".into(), json!("example.org"));
        OrchestrationDocument::new("o-1", "corr", "dns", steps, input)
    }

    #[test]
    fn state_never_moves_backwards() {
        let mut d = doc();
        d.mark_completed("a");
        assert_eq!(d.state, OrchestrationState::Running);

        d.mark_errored("boom");
        d.mark_finished();
        d.mark_completed("b");
        assert_eq!(d.state, OrchestrationState::Errored);
        assert_eq!(d.error_detail.as_deref(), Some("boom"));

        d.mark_errored("second failure");
        assert_eq!(d.error_detail.as_deref(), Some("boom"));
    }

    #[test]
    fn can_proceed_waits_for_every_sibling() {
        let mut d = doc();
        d.mark_completed("a");
        assert!(!d.can_proceed("a"));
        d.mark_completed("b");
        assert!(d.can_proceed("a"));
        assert!(d.can_proceed("b"));
        assert!(!d.can_proceed("ghost"));
    }

    #[test]
    fn empty_steps_are_skipped_when_advancing() {
        let d = doc();
        assert_eq!(d.first_runnable_step(), Some(0));
        assert_eq!(d.next_runnable_step(0), Some(2));
        assert_eq!(d.next_runnable_step(2), None);

        assert!(d.in_final_step("c"));
        assert!(!d.in_final_step("a"));
        assert!(!d.in_final_step("ghost"));
    }

    #[test]
    fn input_mappings_prefer_processing_data() {
        let mut d = doc();
        d.processing_data.insert("record_id".into(), json!(42));
        let activity = Activity::new("c", "t")
            .with_input("record_id", "id")
            .with_input("zone", "domain")
            .with_input("missing", "nothing");

        let inputs = d.activity_inputs(&activity);
        assert_eq!(inputs["id"], json!(42));
        assert_eq!(inputs["domain"], json!("example.org"));
        assert_eq!(inputs["zone"], json!("example.org"));
        assert!(!inputs.contains_key("nothing"));
    }

    #[test]
    fn activity_wire_format_uses_type_and_camel_case() {
        let a: Activity = serde_json::from_value(json!({
            "id": "vault",
            "type": "vault.policy",
            "dependsOn": ["dns"]
        }))
        .unwrap();
        assert_eq!(a.activity_type, "vault.policy");
        assert_eq!(a.depends_on, vec!["dns".to_string()]);
        assert!(a.inputs.is_empty());
    }

    #[test]
    fn response_reflects_terminal_state() {
        let mut d = doc();
        d.output_data.insert("fqdn".into(), json!("a.example.org"));
        d.mark_errored("dns provider rejected the zone");

        let response = OrchestrationResponse::from_document(&d);
        assert!(!response.success);
        assert_eq!(response.manifest_id, "dns");
        assert_eq!(response.properties["fqdn"], json!("a.example.org"));
        assert_eq!(
            response.error_detail.as_deref(),
            Some("dns provider rejected the zone")
        );
    }
}
