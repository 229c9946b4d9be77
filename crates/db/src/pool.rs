//! Postgres connection pool and schema migrations.
//!
//! The schema holds two tables: `orchestration_documents` (versioned
//! documents behind [`PgStore`](crate::PgStore)) and `job_queue` (the
//! messages behind the Postgres activity queue).

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// Shared pool handed to the document store and the queue.
pub type DbPool = PgPool;

/// How long a caller waits for a free connection before the store or queue
/// operation fails and its message is redelivered.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to `database_url` with at most `max_connections` connections.
///
/// Workers hold a connection only per statement or per fetch transaction, so
/// a small pool serves many consumer loops.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!(max_connections, "connecting to provisioner database");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the embedded migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("migrating orchestration_documents and job_queue tables");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
