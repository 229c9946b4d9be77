//! Hosts the consumer loops for every registered activity type.

use std::sync::Arc;

use queue::ActivityQueue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::ExecutorConfig,
    executor::{ActivityExecutor, ProcessorRegistry},
    store::DocumentStore,
    EngineError,
};

pub struct Worker {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Ensure each activity type's queue exists, then start
    /// `consumers_per_type` loops per type.
    pub async fn start(
        registry: &ProcessorRegistry,
        documents: DocumentStore,
        queue: Arc<dyn ActivityQueue>,
        config: ExecutorConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, EngineError> {
        let executors = ActivityExecutor::from_registry(registry, &documents, &queue, &config);
        let consumers = config.consumers_per_type.max(1);
        let mut handles = Vec::with_capacity(executors.len() * consumers);

        for executor in executors {
            queue.ensure_queue(executor.subject()).await?;
            let executor = Arc::new(executor);
            for consumer in 0..consumers {
                handles.push(tokio::spawn(
                    executor.clone().run(consumer, shutdown.child_token()),
                ));
            }
        }

        info!(
            activity_types = registry.len(),
            consumers = handles.len(),
            "worker started"
        );
        Ok(Self { shutdown, handles })
    }

    pub fn consumer_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop fetching and wait for in-flight messages to be settled.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every consumer to exit, e.g. after the token was cancelled
    /// elsewhere.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "consumer task ended abnormally");
            }
        }
        info!("worker stopped");
    }
}
