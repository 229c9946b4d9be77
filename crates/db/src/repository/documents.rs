//! Versioned document repository functions.
//!
//! Writes are compare-and-swap on the `revision` column: a create only
//! succeeds when the key is absent, an update only when the stored revision
//! matches the caller's.

use chrono::Utc;
use sqlx::PgPool;

use crate::{models::DocumentRow, DbError};

/// Fetch a document by key.
pub async fn get_document(pool: &PgPool, key: &str) -> Result<Option<DocumentRow>, DbError> {
    let row = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT key, value, revision, created_at, updated_at
        FROM orchestration_documents
        WHERE key = $1
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Insert a document at revision 1.
///
/// Returns `DbError::AlreadyExists` if the key is taken.
pub async fn create_document(
    pool: &PgPool,
    key: &str,
    value: serde_json::Value,
) -> Result<i64, DbError> {
    let now = Utc::now();

    let revision: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO orchestration_documents (key, value, revision, created_at, updated_at)
        VALUES ($1, $2, 1, $3, $3)
        ON CONFLICT (key) DO NOTHING
        RETURNING revision
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    revision.ok_or_else(|| DbError::AlreadyExists(key.to_owned()))
}

/// Replace a document if its revision still equals `expected_revision`.
///
/// Returns the new revision, `DbError::RevisionConflict` if another writer
/// got there first, or `DbError::NotFound` if the key does not exist.
pub async fn update_document(
    pool: &PgPool,
    key: &str,
    value: serde_json::Value,
    expected_revision: i64,
) -> Result<i64, DbError> {
    let revision: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE orchestration_documents
        SET value = $2, revision = revision + 1, updated_at = $3
        WHERE key = $1 AND revision = $4
        RETURNING revision
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .bind(expected_revision)
    .fetch_optional(pool)
    .await?;

    match revision {
        Some(revision) => Ok(revision),
        None if get_document(pool, key).await?.is_some() => Err(DbError::RevisionConflict {
            key: key.to_owned(),
            expected: expected_revision as u64,
        }),
        None => Err(DbError::NotFound),
    }
}
