//! Cinedex Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Movie catalog fed by a rate-limited, batch-tracked TMDB ingestion pipeline.
//!
//! # Overview
//!
//! - **Ingestion**: scheduled runs that page through the provider listing,
//!   resolve directors and upsert movies with a bounded fetch audit log
//! - **Batches**: one record per run with progress counters and final status
//! - **Catalog**: validated search, movie lookup and reviews
//! - **Persistence**: PostgreSQL via SQLx, with an in-memory store for tests
//!   and dry runs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cinedex_server::{build_driver, config::Config, db::{self, PgCatalogStore}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::run_migrations(&pool).await?;
//!
//!     let driver = build_driver(&config, Arc::new(PgCatalogStore::new(pool)))?;
//!     let summary = driver.run_once().await?;
//!     println!("{} movies upserted", summary.movies_upserted);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::db::CatalogStore;
use crate::error::ProviderError;
use crate::ingest::{IngestDriver, RateLimiter, TmdbClient};

/// Wire the TMDB client, rate limiter and store into a driver
pub fn build_driver(
    config: &Config,
    store: Arc<dyn CatalogStore>,
) -> Result<IngestDriver, ProviderError> {
    let provider = Arc::new(TmdbClient::new(&config.tmdb)?);
    let limiter = Arc::new(RateLimiter::from_config(&config.ingest));
    Ok(IngestDriver::new(
        store,
        provider,
        limiter,
        config.ingest.clone(),
    ))
}

/// Cinedex - movie catalog ingestion service
#[derive(Parser, Debug)]
#[command(name = "cinedex-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the ingestion scheduler until interrupted
    Run,

    /// Execute a single ingestion run and print its summary
    Once {
        /// Keep results in memory instead of writing to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Show statistics for one batch
    Batch {
        /// Batch id
        id: Uuid,
    },

    /// List recent batches
    Batches {
        /// Number of batches to show
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
}
