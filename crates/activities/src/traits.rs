//! The `ActivityProcessor` trait — the contract every activity type must fulfil.

use async_trait::async_trait;

use crate::{ActivityContext, ActivityResult};

/// The core processor trait.
///
/// A processor is invoked once per message delivery, which includes
/// redeliveries after a retry, a reschedule or a crash. Every invocation
/// must therefore be treated as possibly-a-retry: continuation state has to
/// be re-derived from values previously written to the context.
#[async_trait]
pub trait ActivityProcessor: Send + Sync {
    /// Run the activity. Data mutations are recorded on `ctx`; the returned
    /// result tells the engine what to do with the message and the
    /// orchestration.
    async fn process(&self, ctx: &mut ActivityContext) -> ActivityResult;
}
