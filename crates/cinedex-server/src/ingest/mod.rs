//! Movie ingestion pipeline
//!
//! # Architecture
//!
//! - **config**: `TMDB_*` and `INGEST_*` configuration
//! - **rate_limit**: fixed-window limiter shared by all provider calls
//! - **provider**: `MovieProvider` seam and wire types
//! - **tmdb**: TMDB HTTP client
//! - **upsert**: provider record to catalog movie mapping
//! - **coordinator**: batch lifecycle and progress counters
//! - **worker**: page work units with retry
//! - **driver**: discovery, fan-out and finalization of one run
//! - **scheduler**: fixed-interval loop around the driver

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod provider;
pub mod rate_limit;
pub mod scheduler;
pub mod tmdb;
pub mod upsert;
pub mod worker;

pub use config::{IngestConfig, TmdbConfig};
pub use coordinator::{BatchCoordinator, CreateBatchParams};
pub use driver::{IngestDriver, RunSummary, LEASE_NAME};
pub use provider::{Credits, CrewMember, MovieDetails, MoviePage, MovieProvider, RawMovie};
pub use rate_limit::RateLimiter;
pub use scheduler::IngestScheduler;
pub use tmdb::TmdbClient;
pub use upsert::MovieUpserter;
pub use worker::{PageOutcome, PageWorkUnit, PageWorker, RetryPolicy};
