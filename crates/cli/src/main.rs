//! `provisioner` CLI entry-point.
//!
//! Available sub-commands:
//! - `migrate`  — run pending database migrations.
//! - `validate` — compile an orchestration definition into steps.
//! - `worker`   — consume activity queues until Ctrl-C.
//! - `start`    — start an orchestration from a definition file.

mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use activities::builtin::{EchoProcessor, PollProcessor};
use activities::DataMap;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use db::{DbPool, PgStore};
use engine::{
    DocumentStore, EngineConfig, InMemoryDefinitions, OrchestrationDefinition,
    Orchestrator, ProcessorRegistry, Worker,
};
use queue::{ActivityQueue, PgQueue};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "provisioner",
    about = "Durable provisioning orchestration engine",
    version
)]
struct Cli {
    /// JSON file with engine settings; defaults apply to missing fields.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Compile an orchestration definition JSON file and print its steps.
    Validate {
        /// Path to the definition JSON file.
        path: PathBuf,
    },
    /// Consume activity queues with the built-in processors.
    Worker {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[arg(long, default_value_t = 10)]
        max_connections: u32,
        /// Deliveries the `poll` processor reschedules before completing.
        #[arg(long, default_value_t = 3)]
        poll_ready_after: u64,
        #[arg(long, default_value_t = 5_000)]
        poll_interval_ms: u64,
    },
    /// Start an orchestration from a definition file.
    Start {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Definition JSON file.
        definition: PathBuf,
        /// Orchestration id; starting the same id twice is a no-op.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        correlation_id: Option<String>,
        /// JSON object used as the orchestration's input data.
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    let config = match &cli.config {
        Some(path) => read_json::<EngineConfig>(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Migrate { database_url } => {
            let pool = db::pool::create_pool(&database_url, 2).await?;
            db::pool::run_migrations(&pool)
                .await
                .context("migration failed")?;
            info!("migrations applied successfully");
        }
        Command::Validate { path } => {
            let definition: OrchestrationDefinition = read_json(&path)?;
            match engine::instantiate(&definition.activities) {
                Ok(steps) => {
                    println!("definition '{}' is valid", definition.id);
                    for (i, step) in steps.iter().enumerate() {
                        println!("  step {i}: {}", step.ids().join(", "));
                    }
                }
                Err(err) => {
                    eprintln!("validation failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Command::Worker {
            database_url,
            max_connections,
            poll_ready_after,
            poll_interval_ms,
        } => {
            let pool = db::pool::create_pool(&database_url, max_connections).await?;
            let (documents, queue) = backends(pool, &config);

            let mut registry: ProcessorRegistry = HashMap::new();
            registry.insert("echo".into(), Arc::new(EchoProcessor));
            registry.insert(
                "poll".into(),
                Arc::new(PollProcessor::new(
                    poll_ready_after,
                    Duration::from_millis(poll_interval_ms),
                )),
            );

            let worker = Worker::start(
                &registry,
                documents,
                queue,
                config.executor.clone(),
                CancellationToken::new(),
            )
            .await?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutdown requested, draining consumers");
            worker.shutdown().await;
        }
        Command::Start {
            database_url,
            definition,
            id,
            correlation_id,
            payload,
        } => {
            let definition: OrchestrationDefinition = read_json(&definition)?;
            let payload: DataMap =
                serde_json::from_str(&payload).context("--payload must be a JSON object")?;
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let correlation_id = correlation_id.unwrap_or_else(|| id.clone());

            let pool = db::pool::create_pool(&database_url, 2).await?;
            let (documents, queue) = backends(pool, &config);
            let definitions = InMemoryDefinitions::with([definition.clone()]);

            let orchestrator = Orchestrator::new(documents, queue, Arc::new(definitions));
            orchestrator
                .provision_queues(definition.activities.iter().map(|a| &a.activity_type))
                .await?;
            let doc = orchestrator
                .start(
                    &definition.activities,
                    payload,
                    &id,
                    &correlation_id,
                    &definition.id,
                )
                .await?;

            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }

    Ok(())
}

fn backends(pool: DbPool, config: &EngineConfig) -> (DocumentStore, Arc<dyn ActivityQueue>) {
    let documents = DocumentStore::new(Arc::new(PgStore::new(pool.clone())), config.update.clone());
    let queue: Arc<dyn ActivityQueue> = Arc::new(PgQueue::new(
        pool,
        config.queue.visibility_timeout(),
        config.queue.poll_interval(),
    ));
    (documents, queue)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}
