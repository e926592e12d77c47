//! Catalog persistence
//!
//! [`CatalogStore`] is the port the pipeline and the catalog queries talk to.
//! [`PgCatalogStore`] backs it with PostgreSQL; [`InMemoryCatalogStore`] is
//! used by tests and dry runs.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::catalog::{MovieSearch, Paginated};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{Batch, FetchLogEntry, Movie, MovieUpsert, NewBatch, NewReview, Review};

pub use memory::InMemoryCatalogStore;
pub use postgres::PgCatalogStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations used by ingestion and the catalog read side
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Create or update the movie keyed on `external_id` and append `entry`
    /// to its fetch log, atomically.
    async fn upsert_movie(&self, movie: &MovieUpsert, entry: FetchLogEntry) -> StoreResult<Movie>;

    async fn find_movie(&self, id: Uuid) -> StoreResult<Option<Movie>>;

    async fn find_movie_by_external_id(&self, external_id: &str) -> StoreResult<Option<Movie>>;

    async fn search_movies(&self, search: &MovieSearch) -> StoreResult<Paginated<Movie>>;

    async fn count_movies(&self) -> StoreResult<i64>;

    async fn insert_batch(&self, batch: NewBatch) -> StoreResult<Batch>;

    /// Fails with [`StoreError::NotFound`] for unknown ids
    async fn get_batch(&self, id: Uuid) -> StoreResult<Batch>;

    /// Most recent batches first
    async fn list_batches(&self, limit: i64) -> StoreResult<Vec<Batch>>;

    /// pending -> processing, recording the page count
    async fn start_batch(&self, id: Uuid, total_pages: i32) -> StoreResult<Batch>;

    /// Atomically add to the progress counters of an active batch
    async fn increment_batch_progress(&self, id: Uuid, pages: i32, movies: i32)
        -> StoreResult<()>;

    /// Append a page whose work unit ran out of retries
    async fn record_page_failure(&self, id: Uuid, page: i32) -> StoreResult<()>;

    /// processing -> completed. Counters are reconciled with the known totals,
    /// leaving out failed pages, and failed pages are noted in `error_message`.
    async fn complete_batch(&self, id: Uuid) -> StoreResult<Batch>;

    /// Terminal transition to failed
    async fn fail_batch(&self, id: Uuid, message: &str) -> StoreResult<Batch>;

    async fn insert_review(&self, review: NewReview) -> StoreResult<Review>;

    /// Reviews of a movie, newest first
    async fn list_reviews(&self, movie_id: Uuid) -> StoreResult<Vec<Review>>;

    /// Take the named lease for `ttl` unless another holder has it unexpired.
    /// Re-acquiring a lease you already hold extends it.
    async fn try_acquire_lease(&self, name: &str, holder: Uuid, ttl: Duration)
        -> StoreResult<bool>;

    /// Release the lease if `holder` still owns it
    async fn release_lease(&self, name: &str, holder: Uuid) -> StoreResult<()>;
}

/// Open the PostgreSQL pool
pub async fn create_pool(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.into()))?;

    tracing::info!("Database migrations applied");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> StoreResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(StoreError::from)
}
