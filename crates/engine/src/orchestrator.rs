//! Orchestrator — instantiate and kick off new orchestrations.
//!
//! `start` is idempotent per orchestration id: an existing document is
//! returned untouched, and of two concurrent starts only the one whose
//! create-only write wins dispatches the first step.

use std::sync::Arc;

use activities::DataMap;
use queue::{activity_subject, publish_message, ActivityQueue, RESPONSE_SUBJECT};
use tracing::{info, instrument, warn};

use crate::{
    dag::instantiate,
    definitions::OrchestrationDefinitions,
    models::{Activity, ActivityMessage, Manifest, OrchestrationDocument},
    store::{CreateOutcome, DocumentStore},
    EngineError,
};

pub struct Orchestrator {
    documents: DocumentStore,
    queue: Arc<dyn ActivityQueue>,
    definitions: Arc<dyn OrchestrationDefinitions>,
}

impl Orchestrator {
    pub fn new(
        documents: DocumentStore,
        queue: Arc<dyn ActivityQueue>,
        definitions: Arc<dyn OrchestrationDefinitions>,
    ) -> Self {
        Self {
            documents,
            queue,
            definitions,
        }
    }

    /// Make sure a queue exists for every activity type and for responses.
    pub async fn provision_queues<I, S>(&self, activity_types: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for activity_type in activity_types {
            self.queue
                .ensure_queue(&activity_subject(activity_type.as_ref()))
                .await?;
        }
        self.queue.ensure_queue(RESPONSE_SUBJECT).await?;
        Ok(())
    }

    /// Resolve the manifest's definition and start it.
    ///
    /// # Errors
    /// [`EngineError::DefinitionNotFound`] if no definition is registered
    /// under `manifest.manifest_id`, plus everything [`Orchestrator::start`]
    /// can return.
    pub async fn start_manifest(
        &self,
        manifest: &Manifest,
    ) -> Result<OrchestrationDocument, EngineError> {
        let definition = self
            .definitions
            .get(&manifest.manifest_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(manifest.manifest_id.clone()))?;

        self.start(
            &definition.activities,
            manifest.properties.clone(),
            &manifest.id,
            &manifest.correlation_id,
            &manifest.manifest_id,
        )
        .await
    }

    /// Create the orchestration document for `id` and dispatch its first step.
    ///
    /// If a document for `id` already exists it is returned unchanged and
    /// nothing is enqueued.
    ///
    /// # Errors
    /// Grapher errors and [`EngineError::EmptyOrchestration`] leave no state
    /// behind. A dispatch failure after the document was written is returned
    /// as-is; the document stays persisted.
    #[instrument(skip(self, activities, payload), fields(orchestration_type = %orchestration_type))]
    pub async fn start(
        &self,
        activities: &[Activity],
        payload: DataMap,
        id: &str,
        correlation_id: &str,
        orchestration_type: &str,
    ) -> Result<OrchestrationDocument, EngineError> {
        if let Some((existing, _)) = self.documents.get(id).await? {
            info!(orchestration_id = id, state = %existing.state, "orchestration already exists");
            return Ok(existing);
        }

        let steps = instantiate(activities)?;
        let doc = OrchestrationDocument::new(id, correlation_id, orchestration_type, steps, payload);
        let first = doc
            .first_runnable_step()
            .ok_or_else(|| EngineError::EmptyOrchestration(id.to_owned()))?;

        match self.documents.create(&doc).await? {
            CreateOutcome::Created { .. } => {}
            CreateOutcome::AlreadyExists => {
                info!(orchestration_id = id, "lost the create race, returning the winner's document");
                return self
                    .documents
                    .get(id)
                    .await?
                    .map(|(existing, _)| existing)
                    .ok_or_else(|| EngineError::DocumentNotFound(id.to_owned()));
            }
        }

        for activity in &doc.steps[first].activities {
            let message = ActivityMessage {
                orchestration_id: doc.id.clone(),
                activity: activity.clone(),
            };
            let subject = activity_subject(&activity.activity_type);
            if let Err(err) = publish_message(self.queue.as_ref(), &subject, &message).await {
                warn!(
                    orchestration_id = id,
                    activity_id = %activity.id,
                    error = %err,
                    "failed to dispatch first step; document remains persisted"
                );
                return Err(err.into());
            }
        }

        info!(
            orchestration_id = id,
            steps = doc.steps.len(),
            first_step = first,
            dispatched = doc.steps[first].activities.len(),
            "orchestration started"
        );
        Ok(doc)
    }

    pub async fn get_orchestration(
        &self,
        id: &str,
    ) -> Result<Option<OrchestrationDocument>, EngineError> {
        Ok(self.documents.get(id).await?.map(|(doc, _)| doc))
    }
}
