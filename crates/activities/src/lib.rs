//! `activities` crate — the `ActivityProcessor` contract, the per-invocation
//! `ActivityContext`, and the `ActivityResult` outcomes the engine interprets.
//!
//! Every processor — built-in and domain-specific alike — must implement
//! [`ActivityProcessor`]. The engine crate dispatches execution through this
//! trait object, keyed by activity type.

pub mod builtin;
pub mod context;
pub mod error;
pub mod mock;
pub mod result;
pub mod traits;

pub use context::{ActivityContext, ContextChanges, DataMap};
pub use error::ActivityError;
pub use result::ActivityResult;
pub use traits::ActivityProcessor;
