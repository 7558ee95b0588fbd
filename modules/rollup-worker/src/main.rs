use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rollup_common::{Config, DispatchMode, WorkItemId};
use rollup_engine::{effective_dates, RollupDispatcher, RollupUpdateService, RollupWorker};
use rollup_store::{PgRollupQueue, PgRollupStore, RollupQueue};

#[derive(Parser)]
#[command(name = "rollup-worker", about = "Hierarchical date roll-up worker")]
struct Cli {
    /// Jobs left running longer than this are handed back to the queue at startup.
    #[arg(long, env = "ROLLUP_STALE_AFTER_SECS", default_value_t = 300)]
    stale_after_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Process rollup jobs until interrupted (default).
    Run,
    /// Apply database migrations and exit.
    Migrate,
    /// Queue a rollup of the given work items.
    Enqueue { ids: Vec<WorkItemId> },
    /// Recompute the given work items now, cascading through the queue.
    Recompute { ids: Vec<WorkItemId> },
    /// Feed one stored event through the triggers.
    Dispatch {
        event_type: String,
        /// Event payload as JSON.
        payload: String,
    },
    /// Print the dates a work item currently shows.
    Dates { id: WorkItemId },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rollup=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!(
        batch_size = config.rollup.batch_size,
        legacy_mirror = config.rollup.legacy_mirror,
        dispatch_mode = ?config.dispatch_mode,
        max_attempts = config.worker.max_attempts,
        "Rollup config loaded"
    );

    let store = Arc::new(PgRollupStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let queue = Arc::new(PgRollupQueue::new(store.pool().clone(), config.worker.poll_interval));
    let service = Arc::new(RollupUpdateService::new(store.clone(), queue.clone(), config.rollup));

    match cli.command.unwrap_or(Command::Run) {
        Command::Migrate => info!("Migrations applied"),
        Command::Enqueue { ids } => {
            queue.enqueue(ids.clone()).await?;
            info!(?ids, "Rollup job enqueued");
        }
        Command::Recompute { ids } => {
            let summary = service.execute(&ids).await?;
            info!(
                batches = summary.batches,
                updated = summary.updated,
                skipped = ?summary.skipped,
                cascaded = ?summary.cascaded,
                "Rollup complete"
            );
        }
        Command::Dispatch { event_type, payload } => {
            let payload: serde_json::Value = serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let dispatcher = RollupDispatcher::with_default_triggers(service.clone(), config.dispatch_mode);
            let outcome = dispatcher.handle_stored(&event_type, &payload).await?;
            info!(?outcome, "Event dispatched");
        }
        Command::Dates { id } => {
            let dates = effective_dates(&*store, id)
                .await?
                .with_context(|| format!("work item {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&dates)?);
        }
        Command::Run => {
            if config.dispatch_mode == DispatchMode::Inline {
                info!("Inline dispatch configured; worker still drains cascades");
            }
            queue
                .release_stale(Duration::from_secs(cli.stale_after_secs))
                .await?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let worker = RollupWorker::new(service, config.worker);
            let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            handle.await??;
        }
    }

    Ok(())
}
