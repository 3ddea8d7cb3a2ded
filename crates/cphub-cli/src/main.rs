use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use cphub_storage::{ContestStore, MemoryContestStore, PgContestStore};
use cphub_sync::{Aggregator, ContestService, SourceRegistry, SyncConfig, SyncScheduler};
use cphub_web::{AppState, WebConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cphub-cli")]
#[command(about = "Contest hub command-line interface")]
struct Cli {
    /// Keep contests in process memory instead of Postgres.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one aggregation pass and exit.
    Sync,
    /// Recompute contest status without fetching.
    Status,
    /// Apply database migrations.
    Migrate,
    /// Serve the HTTP API with the recurring scheduler.
    Serve,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

async fn open_store(config: &SyncConfig, memory: bool) -> Result<Arc<dyn ContestStore>> {
    if memory {
        info!("using in-memory contest store");
        return Ok(Arc::new(MemoryContestStore::new()));
    }
    let store = PgContestStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("applying migrations")?;
    Ok(Arc::new(store))
}

async fn build_aggregator(config: &SyncConfig, memory: bool) -> Result<Arc<Aggregator>> {
    let registry = SourceRegistry::load(&config.sources_file).await?;
    let store = open_store(config, memory).await?;
    let aggregator = Aggregator::from_config(config, &registry, store)?;
    info!(sources = ?aggregator.source_ids(), "adapters configured");
    Ok(Arc::new(aggregator))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info")?;

    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("reading configuration")?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let aggregator = build_aggregator(&config, cli.memory).await?;
            let summary = aggregator.run_pass().await.context("sync pass failed")?;
            println!(
                "sync complete: run_id={} adapters={} failed={} candidates={} rejected={} duplicates={} stored={}",
                summary.run_id,
                summary.adapters,
                summary.failed_adapters,
                summary.candidates,
                summary.rejected,
                summary.duplicates,
                summary.stored
            );
        }
        Commands::Status => {
            let store = open_store(&config, cli.memory).await?;
            let now = Utc::now();
            let moved = store
                .recompute_status(now)
                .await
                .context("status recompute failed")?;
            println!(
                "status recomputed at {}: finished={} running={} upcoming={}",
                now.to_rfc3339(),
                moved.finished,
                moved.running,
                moved.upcoming
            );
        }
        Commands::Migrate => {
            if cli.memory {
                bail!("migrate needs a database; drop --memory");
            }
            let store = PgContestStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let web = WebConfig::from_env().context("reading web configuration")?;
            let aggregator = build_aggregator(&config, cli.memory).await?;
            let service = Arc::new(ContestService::new(Arc::clone(&aggregator)));

            let scheduler = SyncScheduler::from_config(aggregator, &config);
            if config.scheduler_enabled {
                scheduler.start().await?;
            } else {
                info!("scheduler disabled; contests refresh only on demand");
            }

            let state = AppState::new(service, web.refresh_token.clone());
            let served = cphub_web::serve(state, web.port, cphub_web::shutdown_signal()).await;
            scheduler.stop().await?;
            served?;
        }
    }

    Ok(())
}
