//! Postgres-backed [`ActivityQueue`] over the `job_queue` table.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use db::{repository::jobs, DbPool};

use crate::{ActivityQueue, Delivery, QueueError};

/// Polls the `job_queue` table. Subjects share one table, so provisioning a
/// queue is a no-op.
#[derive(Debug, Clone)]
pub struct PgQueue {
    pool: DbPool,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl PgQueue {
    pub fn new(pool: DbPool, visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
            poll_interval,
        }
    }

    fn job_id(delivery: &Delivery) -> Result<Uuid, QueueError> {
        Uuid::parse_str(&delivery.receipt)
            .map_err(|_| QueueError::InvalidReceipt(delivery.receipt.clone()))
    }
}

#[async_trait]
impl ActivityQueue for PgQueue {
    async fn ensure_queue(&self, subject: &str) -> Result<(), QueueError> {
        debug!(subject, "postgres queue needs no provisioning");
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Value) -> Result<(), QueueError> {
        jobs::enqueue_job(&self.pool, subject, payload).await?;
        Ok(())
    }

    async fn fetch(
        &self,
        subject: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + max_wait;

        loop {
            let rows = jobs::fetch_jobs(
                &self.pool,
                subject,
                max_count as i64,
                self.visibility_timeout,
            )
            .await?;

            if !rows.is_empty() {
                return Ok(rows
                    .into_iter()
                    .map(|row| Delivery {
                        receipt: row.id.to_string(),
                        subject: row.subject,
                        payload: row.payload,
                        attempt: row.attempts.max(0) as u32,
                    })
                    .collect());
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        jobs::delete_job(&self.pool, Self::job_id(delivery)?).await?;
        Ok(())
    }

    async fn nak_with_delay(
        &self,
        delivery: &Delivery,
        delay: Duration,
    ) -> Result<(), QueueError> {
        jobs::release_job(&self.pool, Self::job_id(delivery)?, delay).await?;
        Ok(())
    }
}
