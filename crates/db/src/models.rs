//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// orchestration_documents
// ---------------------------------------------------------------------------

/// A versioned document row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentRow {
    pub key: String,
    /// Serialised orchestration document.
    pub value: serde_json::Value,
    /// Bumped by one on every successful write; starts at 1.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// job_queue
// ---------------------------------------------------------------------------

/// A message row in the queue table.
///
/// A row is visible to consumers once `visible_at` has passed. Fetching
/// pushes `visible_at` forward by the visibility timeout; acknowledging
/// deletes the row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub subject: String,
    pub payload: serde_json::Value,
    /// Number of times the row has been fetched.
    pub attempts: i32,
    pub visible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
