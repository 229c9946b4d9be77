//! Activity execution engine.
//!
//! `ActivityExecutor` drives one activity type. For every delivered message
//! it:
//! 1. Decodes the envelope and loads the orchestration document.
//! 2. Builds an `ActivityContext` and dispatches it to the type's processor.
//! 3. Persists the context's writes through the compare-and-swap protocol.
//! 4. Acks, naks or reschedules the message according to the result.
//! 5. On completion, advances the orchestration once every sibling in the
//!    step is done, or finishes it after the last step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use activities::{ActivityContext, ActivityProcessor, ActivityResult, ContextChanges};
use queue::{activity_subject, publish_message, ActivityQueue, Delivery, RESPONSE_SUBJECT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::ExecutorConfig,
    models::{ActivityMessage, OrchestrationDocument, OrchestrationResponse, OrchestrationState},
    store::DocumentStore,
    EngineError, ErrorKind,
};

// ---------------------------------------------------------------------------
// Processor registry
// ---------------------------------------------------------------------------

/// Maps activity types to their `ActivityProcessor` implementations.
pub type ProcessorRegistry = HashMap<String, Arc<dyn ActivityProcessor>>;

// ---------------------------------------------------------------------------
// Outcome of a handled message
// ---------------------------------------------------------------------------

/// What happened to a message that was handled without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The orchestration was already terminal; nothing ran.
    Skipped,
    /// The processor suspended the activity until an external trigger.
    Waiting,
    /// The message will be redelivered after the delay.
    Rescheduled(Duration),
    /// The activity completed; siblings in its step are still running.
    AwaitingSiblings,
    /// The activity completed its step and the next step was dispatched.
    Advanced { step: usize },
    /// The activity completed the last step; the orchestration is complete.
    Finished,
}

// ---------------------------------------------------------------------------
// ActivityExecutor
// ---------------------------------------------------------------------------

pub struct ActivityExecutor {
    activity_type: String,
    subject: String,
    processor: Arc<dyn ActivityProcessor>,
    documents: DocumentStore,
    queue: Arc<dyn ActivityQueue>,
    config: ExecutorConfig,
}

impl ActivityExecutor {
    pub fn new(
        activity_type: impl Into<String>,
        processor: Arc<dyn ActivityProcessor>,
        documents: DocumentStore,
        queue: Arc<dyn ActivityQueue>,
        config: ExecutorConfig,
    ) -> Self {
        let activity_type = activity_type.into();
        Self {
            subject: activity_subject(&activity_type),
            activity_type,
            processor,
            documents,
            queue,
            config,
        }
    }

    /// One executor per registered activity type.
    pub fn from_registry(
        registry: &ProcessorRegistry,
        documents: &DocumentStore,
        queue: &Arc<dyn ActivityQueue>,
        config: &ExecutorConfig,
    ) -> Vec<Self> {
        registry
            .iter()
            .map(|(activity_type, processor)| {
                Self::new(
                    activity_type.clone(),
                    processor.clone(),
                    documents.clone(),
                    queue.clone(),
                    config.clone(),
                )
            })
            .collect()
    }

    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Consume messages until `shutdown` is cancelled.
    ///
    /// Cancellation stops further fetches; a message already being handled
    /// runs to its ack/nak first. Fetched messages that were not started yet
    /// are handed back for redelivery.
    pub async fn run(self: Arc<Self>, consumer: usize, shutdown: CancellationToken) {
        info!(activity_type = %self.activity_type, consumer, "consumer started");

        while !shutdown.is_cancelled() {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.queue.fetch(&self.subject, self.config.fetch_batch, self.config.fetch_wait()) => fetched,
            };

            let deliveries = match fetched {
                Ok(deliveries) => deliveries,
                Err(err) => {
                    error!(activity_type = %self.activity_type, error = %err, "fetch failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff()) => continue,
                    }
                }
            };

            let mut pending = deliveries.into_iter();
            for delivery in pending.by_ref() {
                self.handle_logged(&delivery).await;
                if shutdown.is_cancelled() {
                    break;
                }
            }
            for delivery in pending {
                if let Err(err) = self.queue.nak(&delivery).await {
                    warn!(error = %err, "failed to release message on shutdown");
                }
            }
        }

        info!(activity_type = %self.activity_type, consumer, "consumer stopped");
    }

    async fn handle_logged(&self, delivery: &Delivery) {
        match self.handle(delivery).await {
            Ok(outcome) => debug!(activity_type = %self.activity_type, ?outcome, "message handled"),
            Err(err) => match err.kind() {
                ErrorKind::Recoverable => {
                    warn!(activity_type = %self.activity_type, error = %err, "message will be redelivered")
                }
                ErrorKind::Client | ErrorKind::Fatal => {
                    error!(activity_type = %self.activity_type, error = %err, "message failed")
                }
            },
        }
    }

    /// Process one delivery end to end, including its ack/nak.
    ///
    /// # Errors
    /// Returns the reason when the activity did not complete normally: a
    /// retry request (message nak'ed), a fatal failure (orchestration errored,
    /// message acked), an undecodable message (acked), or an infrastructure
    /// failure while advancing (message nak'ed).
    #[instrument(skip(self, delivery), fields(activity_type = %self.activity_type, attempt = delivery.attempt))]
    pub async fn handle(&self, delivery: &Delivery) -> Result<ExecutionOutcome, EngineError> {
        // ------------------------------------------------------------------
        // Receive
        // ------------------------------------------------------------------
        let message: ActivityMessage = match delivery.decode() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "discarding undecodable message");
                self.queue.ack(delivery).await?;
                return Err(EngineError::InvalidMessage(err.to_string()));
            }
        };
        let orchestration_id = message.orchestration_id.as_str();
        let activity = &message.activity;

        // ------------------------------------------------------------------
        // Load
        // ------------------------------------------------------------------
        let (doc, revision) = match self.documents.get(orchestration_id).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                warn!(orchestration_id, "discarding message for unknown orchestration");
                self.queue.ack(delivery).await?;
                return Err(EngineError::DocumentNotFound(orchestration_id.to_owned()));
            }
            Err(err) => {
                self.queue.nak(delivery).await?;
                return Err(err);
            }
        };

        if doc.step_index_of(&activity.id).is_none() {
            self.queue.ack(delivery).await?;
            return Err(EngineError::InvalidMessage(format!(
                "activity '{}' is not part of orchestration '{}'",
                activity.id, orchestration_id
            )));
        }

        if doc.state == OrchestrationState::Completed
            && doc.is_completed(&activity.id)
            && doc.in_final_step(&activity.id)
        {
            // The completion write landed but its response may not have.
            debug!(orchestration_id, activity_id = %activity.id, "re-publishing completion response");
            if let Err(err) = self.publish_completion(&doc).await {
                self.queue.nak(delivery).await?;
                return Err(err);
            }
            self.queue.ack(delivery).await?;
            return Ok(ExecutionOutcome::Finished);
        }

        if doc.state.is_terminal() {
            debug!(orchestration_id, state = %doc.state, "orchestration already terminal");
            self.queue.ack(delivery).await?;
            return Ok(ExecutionOutcome::Skipped);
        }

        if doc.is_completed(&activity.id) {
            // Redelivered after completing; only the advancement is retried.
            debug!(orchestration_id, activity_id = %activity.id, "activity already completed");
            return self
                .complete(delivery, &message, &doc, revision, ContextChanges::default())
                .await;
        }

        // ------------------------------------------------------------------
        // Invoke
        // ------------------------------------------------------------------
        let mut ctx = ActivityContext::new(
            activity.id.clone(),
            doc.id.clone(),
            doc.activity_inputs(activity),
            doc.processing_data.clone(),
            doc.output_data.clone(),
        );
        let result = self.processor.process(&mut ctx).await;
        let changes = ctx.into_changes();
        debug!(orchestration_id, activity_id = %activity.id, result = result.label(), "processor returned");

        // ------------------------------------------------------------------
        // Interpret
        // ------------------------------------------------------------------
        match result {
            ActivityResult::RetryError(reason) => {
                if let Err(err) = self.persist(&doc, revision, &changes).await {
                    warn!(orchestration_id, error = %err, "could not persist writes before retry");
                }
                self.queue.nak(delivery).await?;
                Err(EngineError::ActivityRetry {
                    activity_id: activity.id.clone(),
                    message: reason,
                })
            }

            ActivityResult::FatalError(reason) => {
                let detail = format!("activity '{}' failed: {}", activity.id, reason);
                let updated = self
                    .documents
                    .update(&doc, revision, |d| {
                        d.apply_changes(&changes);
                        d.mark_errored(detail.clone());
                    })
                    .await;

                // Ack even if the update failed: a permanent failure must not
                // be redelivered forever.
                let acked = self.queue.ack(delivery).await;

                match updated {
                    Ok((errored, _)) if errored.error_detail.as_deref() == Some(detail.as_str()) => {
                        self.publish_response(&errored).await;
                    }
                    Ok(_) => debug!(orchestration_id, "orchestration was already terminal"),
                    Err(err) => error!(orchestration_id, error = %err, "failed to mark orchestration errored"),
                }
                acked?;

                Err(EngineError::ActivityFatal {
                    activity_id: activity.id.clone(),
                    message: reason,
                })
            }

            ActivityResult::Wait => {
                if let Err(err) = self.persist(&doc, revision, &changes).await {
                    self.queue.nak(delivery).await?;
                    return Err(err);
                }
                self.queue.ack(delivery).await?;
                info!(orchestration_id, activity_id = %activity.id, "activity waiting for external trigger");
                Ok(ExecutionOutcome::Waiting)
            }

            ActivityResult::Schedule(delay) => {
                if let Err(err) = self.persist(&doc, revision, &changes).await {
                    self.queue.nak(delivery).await?;
                    return Err(err);
                }
                self.queue.nak_with_delay(delivery, delay).await?;
                debug!(orchestration_id, activity_id = %activity.id, ?delay, "activity rescheduled");
                Ok(ExecutionOutcome::Rescheduled(delay))
            }

            ActivityResult::Complete | ActivityResult::Continue => {
                self.complete(delivery, &message, &doc, revision, changes).await
            }
        }
    }

    async fn persist(
        &self,
        doc: &OrchestrationDocument,
        revision: u64,
        changes: &ContextChanges,
    ) -> Result<(), EngineError> {
        self.documents
            .update(doc, revision, |d| d.apply_changes(changes))
            .await
            .map(|_| ())
    }

    /// Mark the activity complete and, if it was the last of its step, move on.
    async fn complete(
        &self,
        delivery: &Delivery,
        message: &ActivityMessage,
        doc: &OrchestrationDocument,
        revision: u64,
        changes: ContextChanges,
    ) -> Result<ExecutionOutcome, EngineError> {
        let activity_id = message.activity.id.as_str();

        // Everything below reads the document returned by this write, never
        // the snapshot the processor saw.
        let updated = self
            .documents
            .update(doc, revision, |d| {
                d.apply_changes(&changes);
                d.mark_completed(activity_id);
            })
            .await;
        let (doc, revision) = match updated {
            Ok(updated) => updated,
            Err(err) => {
                self.queue.nak(delivery).await?;
                return Err(err);
            }
        };

        if doc.state.is_terminal() {
            debug!(orchestration_id = %doc.id, state = %doc.state, "orchestration ended meanwhile");
            self.queue.ack(delivery).await?;
            return Ok(ExecutionOutcome::Skipped);
        }

        if !doc.can_proceed(activity_id) {
            self.queue.ack(delivery).await?;
            return Ok(ExecutionOutcome::AwaitingSiblings);
        }

        let step = doc
            .step_index_of(activity_id)
            .ok_or_else(|| EngineError::InvalidMessage(activity_id.to_owned()))?;

        match doc.next_runnable_step(step) {
            Some(next) => {
                if let Err(err) = self.dispatch_step(&doc, next).await {
                    self.queue.nak(delivery).await?;
                    return Err(err);
                }
                self.queue.ack(delivery).await?;
                info!(orchestration_id = %doc.id, step = next, "advanced to next step");
                Ok(ExecutionOutcome::Advanced { step: next })
            }
            None => {
                if let Err(err) = self.finish(&doc, revision).await {
                    self.queue.nak(delivery).await?;
                    return Err(err);
                }
                self.queue.ack(delivery).await?;
                Ok(ExecutionOutcome::Finished)
            }
        }
    }

    async fn dispatch_step(&self, doc: &OrchestrationDocument, step: usize) -> Result<(), EngineError> {
        for activity in &doc.steps[step].activities {
            let message = ActivityMessage {
                orchestration_id: doc.id.clone(),
                activity: activity.clone(),
            };
            publish_message(
                self.queue.as_ref(),
                &activity_subject(&activity.activity_type),
                &message,
            )
            .await?;
        }
        Ok(())
    }

    async fn finish(&self, doc: &OrchestrationDocument, revision: u64) -> Result<(), EngineError> {
        let (finished, _) = self
            .documents
            .update(doc, revision, |d| d.mark_finished())
            .await?;

        if finished.state != OrchestrationState::Completed {
            debug!(orchestration_id = %finished.id, state = %finished.state, "not completing a terminal orchestration");
            return Ok(());
        }

        self.publish_completion(&finished).await
    }

    /// Publish the success response for a Completed document.
    ///
    /// Called again on redelivery when the publish after the completion
    /// write failed, so consumers of the response subject may see duplicates.
    async fn publish_completion(&self, doc: &OrchestrationDocument) -> Result<(), EngineError> {
        let response = OrchestrationResponse::from_document(doc);
        publish_message(self.queue.as_ref(), RESPONSE_SUBJECT, &response).await?;
        info!(orchestration_id = %doc.id, correlation_id = %doc.correlation_id, "orchestration completed");
        Ok(())
    }

    /// Failure responses are best effort; the errored document is the record.
    async fn publish_response(&self, doc: &OrchestrationDocument) {
        let response = OrchestrationResponse::from_document(doc);
        match publish_message(self.queue.as_ref(), RESPONSE_SUBJECT, &response).await {
            Ok(()) => info!(
                orchestration_id = %doc.id,
                error_detail = doc.error_detail.as_deref().unwrap_or_default(),
                "orchestration errored"
            ),
            Err(err) => error!(orchestration_id = %doc.id, error = %err, "failed to publish failure response"),
        }
    }
}
