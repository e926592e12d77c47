//! Cinedex Server - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use cinedex_common::logging::{init_logging, LogConfig};
use clap::Parser;
use tokio::signal;
use tracing::info;
use uuid::Uuid;

use cinedex_server::{
    build_driver,
    config::Config,
    db::{self, CatalogStore, InMemoryCatalogStore, PgCatalogStore},
    ingest::{BatchCoordinator, IngestScheduler},
    Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("cinedex-server")
        .filter_directives("cinedex_server=debug,sqlx=warn,reqwest=info")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let config = Config::load()?;
    info!(
        base_url = %config.tmdb.base_url,
        interval_secs = config.ingest.interval_secs,
        page_ceiling = config.ingest.page_ceiling(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Once { dry_run: true } => {
            info!("Dry run, results are kept in memory");
            run_once(&config, Arc::new(InMemoryCatalogStore::new())).await
        }
        Commands::Once { dry_run: false } => run_once(&config, connect(&config).await?).await,
        Commands::Run => run_scheduler(&config, connect(&config).await?).await,
        Commands::Batch { id } => show_batch(connect(&config).await?, id).await,
        Commands::Batches { limit } => list_batches(connect(&config).await?, limit).await,
    }
}

/// Open the pool, apply migrations and wrap it in a store
async fn connect(config: &Config) -> Result<Arc<dyn CatalogStore>> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(Arc::new(PgCatalogStore::new(pool)))
}

async fn run_once(config: &Config, store: Arc<dyn CatalogStore>) -> Result<()> {
    config.tmdb.validate()?;
    let driver = build_driver(config, store)?;
    let summary = driver.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_scheduler(config: &Config, store: Arc<dyn CatalogStore>) -> Result<()> {
    if !config.ingest.enabled {
        info!("Ingestion is disabled (INGEST_ENABLED=false), nothing to run");
        return Ok(());
    }
    config.tmdb.validate()?;

    let driver = Arc::new(build_driver(config, store)?);
    IngestScheduler::new(driver, config.ingest.interval())
        .run_until(shutdown_signal())
        .await;

    info!("Cinedex server shut down gracefully");
    Ok(())
}

async fn show_batch(store: Arc<dyn CatalogStore>, id: Uuid) -> Result<()> {
    let coordinator = BatchCoordinator::new(store);
    let batch = coordinator.get_batch(id).await?;
    let progress = batch.progress();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "batch": batch,
            "progress": progress,
        }))?
    );
    Ok(())
}

async fn list_batches(store: Arc<dyn CatalogStore>, limit: i64) -> Result<()> {
    let coordinator = BatchCoordinator::new(store);
    for batch in coordinator.recent_batches(limit).await? {
        println!(
            "{}  {:<10}  pages {}/{} ({} failed)  movies {}  started {}",
            batch.id,
            batch.status.as_str(),
            batch.pages_processed,
            batch.total_pages.map_or_else(|| "?".to_string(), |t| t.to_string()),
            batch.pages_failed(),
            batch.movies_processed,
            batch.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping scheduler");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping scheduler");
        },
    }
}
