//! `MockProcessor` — a test double for `ActivityProcessor`.
//!
//! Useful in unit and scenario tests where a real processor is either
//! unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{ActivityContext, ActivityProcessor, ActivityResult};

/// Behaviour injected into `MockProcessor` at construction time.
pub enum MockBehaviour {
    /// Return the same result on every call.
    Always(ActivityResult),
    /// Return the scripted results in order; the last one repeats.
    Script(Mutex<VecDeque<ActivityResult>>),
}

/// A mock processor that records every call it receives and returns a
/// programmer-specified result.
pub struct MockProcessor {
    /// Label used in test assertions and written as `output[<activity id>]`.
    pub name: String,
    /// What the processor will do when `process` is called.
    pub behaviour: MockBehaviour,
    /// Activity ids seen by this processor (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockProcessor {
    /// Create a mock that always completes.
    pub fn completing(name: impl Into<String>) -> Self {
        Self::returning(name, ActivityResult::Complete)
    }

    /// Create a mock that always returns `result`.
    pub fn returning(name: impl Into<String>, result: ActivityResult) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Always(result),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `FatalError`.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::returning(name, ActivityResult::fatal(msg))
    }

    /// Create a mock that always fails with a `RetryError`.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::returning(name, ActivityResult::retry(msg))
    }

    /// Create a mock that walks through `results` one call at a time.
    pub fn scripted(name: impl Into<String>, results: Vec<ActivityResult>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Script(Mutex::new(results.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this processor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of invocations for one activity id.
    pub fn calls_for(&self, activity_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == activity_id)
            .count()
    }

    fn next_result(&self) -> ActivityResult {
        match &self.behaviour {
            MockBehaviour::Always(result) => result.clone(),
            MockBehaviour::Script(script) => {
                let mut script = script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap_or(ActivityResult::Complete)
                } else {
                    script.front().cloned().unwrap_or(ActivityResult::Complete)
                }
            }
        }
    }
}

#[async_trait]
impl ActivityProcessor for MockProcessor {
    async fn process(&self, ctx: &mut ActivityContext) -> ActivityResult {
        self.calls.lock().unwrap().push(ctx.activity_id().to_owned());

        // Leave a trace in the output so tests can follow the data.
        let activity_id = ctx.activity_id().to_owned();
        ctx.set_output(activity_id, Value::String(self.name.clone()));

        self.next_result()
    }
}
