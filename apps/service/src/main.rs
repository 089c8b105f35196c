#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use upkeep::config::Config;
use upkeep::database::pool::open_pool;
use upkeep::database::{LibsqlStore, Store, initialize_database};
use upkeep::notifier::Notifiers;
use upkeep::orchestrator::{Orchestrator, RetentionCleanup};

#[derive(Parser)]
#[command(name = "upkeep", version, about = "Self-hosted uptime monitor")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/upkeep/config.toml
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor every service until interrupted (default)
    Run,
    /// Probe one service once and print its status and 24 hour aggregates
    Check {
        id: i64,
        /// Store the outcome as a hit or failure
        #[arg(long)]
        record: bool,
    },
    /// Send a test message through one notifier
    TestNotifier { id: i64 },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("Failed to load configuration")?;
    logger::init_with(&config.logging.level, config.logging.format.parse().ok());

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check { id, record } => check(config, id, record).await,
        Command::TestNotifier { id } => test_notifier(&config, id).await,
        Command::Config => {
            println!("{config}");
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<LibsqlStore>> {
    let pool = open_pool(&config.database.path, config.database.pool_size)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path))?;

    info!("Initializing database schema...");
    let conn = pool.get().await?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok(Arc::new(LibsqlStore::new_from_pool(pool)))
}

/// Save seed services, then return every stored service
async fn load_services(config: &Config, store: &LibsqlStore) -> Result<Vec<upkeep::monitoring::Service>> {
    for service in &config.services {
        store.save_service(service).await?;
    }
    Ok(store.list_services().await?)
}

async fn run(config: Config) -> Result<()> {
    info!("Starting upkeep...");
    let store = open_store(&config).await?;
    let services = load_services(&config, &store).await?;

    let notifiers = Notifiers::from_configs(&config.notifiers).context("Invalid notifier configuration")?;
    let orchestrator = Orchestrator::new(store.clone(), notifiers.clone())?;

    info!(services = services.len(), notifiers = notifiers.channels().len(), "Loaded configuration");
    for service in services {
        orchestrator.start(service);
    }

    let shutdown = orchestrator.shutdown_token().clone();
    let notifier_handles = notifiers.start(&shutdown);
    let retention = RetentionCleanup::new(store, config.retention_policy()).start_periodic_cleanup(shutdown.clone());

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("Shutting down...");

    orchestrator.shutdown().await;
    for handle in notifier_handles.into_iter().chain(std::iter::once(retention)) {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!(online = orchestrator.count_online(), "Stopped");
    Ok(())
}

async fn check(config: Config, id: i64, record: bool) -> Result<()> {
    let store = open_store(&config).await?;
    let service = load_services(&config, &store)
        .await?
        .into_iter()
        .find(|s| s.id == id)
        .with_context(|| format!("No service with id {id}"))?;

    // Notifications are only delivered by a running monitor.
    let orchestrator = Orchestrator::new(store, Notifiers::default())?;
    orchestrator.register(service);

    orchestrator.check(id, record).await?;
    let summary = orchestrator.summary(id).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn test_notifier(config: &Config, id: i64) -> Result<()> {
    let notifiers = Notifiers::from_configs(&config.notifiers).context("Invalid notifier configuration")?;
    notifiers.test(id).await.with_context(|| format!("Notifier {id} failed its test"))?;
    println!("Notifier {id} is working");
    Ok(())
}
