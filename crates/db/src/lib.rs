//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed row structs, repository functions for
//! every table in the provisioner schema, and the [`VersionedStore`]
//! abstraction (compare-and-swap key/value access) the engine keeps its
//! orchestration documents in. No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use pool::DbPool;
pub use store::{PgStore, Versioned, VersionedStore};
