use anyhow::{Context, Result};
use asha_sync::config::AshaSyncConfig;
use asha_sync::connectivity::spawn_probe_poller;
use asha_sync::telemetry::init_tracing;
use asha_sync::{SyncEngine, SyncOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// ASHA-EHR sync agent
#[derive(Parser, Debug)]
#[command(name = "asha-sync")]
#[command(about = "Offline-first outbox and reconciliation engine for ASHA-EHR", version)]
struct Args {
    /// Configuration file path (YAML or TOML)
    #[arg(short, long, env = "ASHA_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the local database path
    #[arg(long)]
    db_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep syncing: on connectivity regained, on sign-in and on a timer
    Run,
    /// Run a single reconciliation pass and print the result
    Sync,
    /// Print queue depth and reconciler state
    Status,
    /// List outstanding queue entries
    Queue {
        /// Only entries whose last dispatch failed
        #[arg(long)]
        failed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AshaSyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = args.db_path {
        config.database.db_path = db_path;
    }

    init_tracing(&config.logging, args.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting asha-sync");

    let engine = SyncEngine::from_config(&config)
        .await
        .context("Failed to start sync engine")?;

    match args.command {
        Command::Run => run(&engine, &config).await?,
        Command::Sync => {
            let outcome = engine.sync_now().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let SyncOutcome::Aborted { error } = outcome {
                anyhow::bail!("sync aborted: {}", error);
            }
        }
        Command::Status => {
            let status = engine.sync_manager().status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Queue { failed } => {
            let entries = if failed {
                engine.queue().failed_entries().await?
            } else {
                engine.queue().list_pending().await?
            };
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    engine.close().await?;
    Ok(())
}

/// Daemon mode: wire every trigger and wait for ctrl-c
async fn run(engine: &SyncEngine, config: &AshaSyncConfig) -> Result<()> {
    let manager = engine.sync_manager();

    let (online, poller) = spawn_probe_poller(
        engine.connectivity().clone(),
        Duration::from_secs(config.connectivity.poll_interval_secs),
    );

    let mut tasks = vec![
        poller,
        manager.spawn_connectivity_watcher(online, config.sync.settle_delay()),
        manager.spawn_auth_watcher(engine.session().subscribe()),
    ];
    if let Some(interval) = config.sync.interval() {
        tasks.push(manager.spawn_periodic(interval));
    }

    info!(
        settle_delay_ms = config.sync.settle_delay_ms,
        interval_secs = config.sync.interval_secs,
        "Sync agent running, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    for task in tasks {
        task.abort();
    }

    Ok(())
}
