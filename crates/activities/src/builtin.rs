//! Small general-purpose processors shipped with the engine.
//!
//! Domain processors (DNS, identity, secrets, ...) live outside this
//! workspace; these exist for smoke-testing a deployment.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::{ActivityContext, ActivityProcessor, ActivityResult};

/// Copies its input view into `output[<activity id>]` and completes.
#[derive(Debug, Default, Clone)]
pub struct EchoProcessor;

#[async_trait]
impl ActivityProcessor for EchoProcessor {
    async fn process(&self, ctx: &mut ActivityContext) -> ActivityResult {
        let inputs: serde_json::Map<String, Value> = ctx
            .inputs()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let key = ctx.activity_id().to_owned();
        ctx.set_output(key, Value::Object(inputs));
        info!(
            activity_id = ctx.activity_id(),
            orchestration_id = ctx.orchestration_id(),
            "echo activity complete"
        );
        ActivityResult::Complete
    }
}

/// Polls an external condition by rescheduling itself.
///
/// The attempt counter is kept in processing data under
/// `<activity id>.attempts`, so it survives redelivery. Once the counter
/// reaches `ready_after` the activity completes.
#[derive(Debug, Clone)]
pub struct PollProcessor {
    pub ready_after: u64,
    pub interval: Duration,
}

impl PollProcessor {
    pub fn new(ready_after: u64, interval: Duration) -> Self {
        Self { ready_after, interval }
    }

    pub fn counter_key(activity_id: &str) -> String {
        format!("{activity_id}.attempts")
    }
}

#[async_trait]
impl ActivityProcessor for PollProcessor {
    async fn process(&self, ctx: &mut ActivityContext) -> ActivityResult {
        let key = Self::counter_key(ctx.activity_id());
        let attempts = ctx.processing_as::<u64>(&key).unwrap_or(0) + 1;
        ctx.set_processing(key, attempts);

        if attempts >= self.ready_after {
            let activity_id = ctx.activity_id().to_owned();
            ctx.set_output(activity_id, attempts);
            return ActivityResult::Complete;
        }

        debug!(
            activity_id = ctx.activity_id(),
            attempts,
            ready_after = self.ready_after,
            "not ready yet, rescheduling"
        );
        ActivityResult::Schedule(self.interval)
    }
}
