//! Job queue repository functions.
//!
//! The durable activity queue is backed by the `job_queue` Postgres table.
//! Consumers poll the table and use `SELECT … FOR UPDATE SKIP LOCKED`
//! for safe concurrent processing; a fetched row stays invisible until its
//! `visible_at` passes, which is how unacknowledged messages get redelivered.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::JobRow, DbError};

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Enqueue a new message on `subject`, visible immediately.
pub async fn enqueue_job(
    pool: &PgPool,
    subject: &str,
    payload: serde_json::Value,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        INSERT INTO job_queue (id, subject, payload, attempts, visible_at, created_at, updated_at)
        VALUES ($1, $2, $3, 0, $4, $4, $4)
        RETURNING id, subject, payload, attempts, visible_at, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(subject)
    .bind(payload)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically fetch up to `limit` visible messages on `subject` and hide them
/// for `visibility_timeout`.
///
/// Returns an empty vector if nothing is visible.
pub async fn fetch_jobs(
    pool: &PgPool,
    subject: &str,
    limit: i64,
    visibility_timeout: Duration,
) -> Result<Vec<JobRow>, DbError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, subject, payload, attempts, visible_at, created_at, updated_at
        FROM job_queue
        WHERE subject = $1 AND visible_at <= $2
        ORDER BY created_at ASC
        LIMIT $3
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(subject)
    .bind(now)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    if rows.is_empty() {
        tx.rollback().await?;
        return Ok(rows);
    }

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let hidden_until = now + to_chrono(visibility_timeout);

    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        UPDATE job_queue
        SET attempts = attempts + 1, visible_at = $1, updated_at = $2
        WHERE id = ANY($3)
        RETURNING id, subject, payload, attempts, visible_at, created_at, updated_at
        "#,
    )
    .bind(hidden_until)
    .bind(now)
    .bind(ids)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(rows)
}

/// Acknowledge a message by deleting it.
pub async fn delete_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM job_queue WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Make a message visible again after `delay` (zero for immediate redelivery).
pub async fn release_job(pool: &PgPool, job_id: Uuid, delay: Duration) -> Result<(), DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE job_queue SET visible_at = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(now + to_chrono(delay))
    .bind(now)
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
