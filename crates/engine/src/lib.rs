//! `engine` crate — orchestration models, dependency grapher, document store
//! and the activity execution engine.

pub mod config;
pub mod dag;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod worker;

pub use config::{EngineConfig, ExecutorConfig, QueueConfig, UpdateConfig};
pub use dag::instantiate;
pub use definitions::{InMemoryDefinitions, OrchestrationDefinitions};
pub use error::{EngineError, ErrorKind};
pub use executor::{ActivityExecutor, ExecutionOutcome, ProcessorRegistry};
pub use models::{
    Activity, ActivityMessage, InputMapping, Manifest, OrchestrationDefinition,
    OrchestrationDocument, OrchestrationResponse, OrchestrationState, Step,
};
pub use orchestrator::Orchestrator;
pub use store::{CreateOutcome, DocumentStore};
pub use worker::Worker;

#[cfg(test)]
mod executor_tests;
