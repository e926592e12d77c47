//! End-to-end ingestion runs against a scripted provider and the in-memory store
//!
//! Time is paused so rate-limit windows and retry backoff elapse instantly.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    details_with_director, init_test_tracing, raw_movie, test_ingest_config, StubProvider,
};
use uuid::Uuid;

use cinedex_server::catalog::{MovieSearch, Paginated};
use cinedex_server::db::{CatalogStore, InMemoryCatalogStore, StoreResult};
use cinedex_server::error::{IngestError, StoreError};
use cinedex_server::ingest::{
    IngestConfig, IngestDriver, IngestScheduler, RateLimiter, RawMovie, LEASE_NAME,
};
use cinedex_server::models::{
    Batch, BatchStatus, FetchLogEntry, FetchStatus, Movie, MovieUpsert, NewBatch, NewReview,
    Review,
};

struct Harness {
    store: Arc<InMemoryCatalogStore>,
    provider: Arc<StubProvider>,
    driver: IngestDriver,
}

fn harness(provider: StubProvider, config: IngestConfig) -> Harness {
    init_test_tracing();

    let store = Arc::new(InMemoryCatalogStore::new());
    let provider = Arc::new(provider);
    let limiter = Arc::new(RateLimiter::from_config(&config));
    let driver = IngestDriver::new(store.clone(), provider.clone(), limiter, config);

    Harness {
        store,
        provider,
        driver,
    }
}

/// In-memory store that can refuse batch completion or lease renewal
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryCatalogStore,
    fail_completion: AtomicBool,
    /// Grant the first lease request, refuse every later one
    deny_renewal: AtomicBool,
    lease_requests: AtomicUsize,
}

#[async_trait]
impl CatalogStore for FaultyStore {
    async fn upsert_movie(&self, movie: &MovieUpsert, entry: FetchLogEntry) -> StoreResult<Movie> {
        self.inner.upsert_movie(movie, entry).await
    }

    async fn find_movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        self.inner.find_movie(id).await
    }

    async fn find_movie_by_external_id(&self, external_id: &str) -> StoreResult<Option<Movie>> {
        self.inner.find_movie_by_external_id(external_id).await
    }

    async fn search_movies(&self, search: &MovieSearch) -> StoreResult<Paginated<Movie>> {
        self.inner.search_movies(search).await
    }

    async fn count_movies(&self) -> StoreResult<i64> {
        self.inner.count_movies().await
    }

    async fn insert_batch(&self, batch: NewBatch) -> StoreResult<Batch> {
        self.inner.insert_batch(batch).await
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Batch> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self, limit: i64) -> StoreResult<Vec<Batch>> {
        self.inner.list_batches(limit).await
    }

    async fn start_batch(&self, id: Uuid, total_pages: i32) -> StoreResult<Batch> {
        self.inner.start_batch(id, total_pages).await
    }

    async fn increment_batch_progress(
        &self,
        id: Uuid,
        pages: i32,
        movies: i32,
    ) -> StoreResult<()> {
        self.inner.increment_batch_progress(id, pages, movies).await
    }

    async fn record_page_failure(&self, id: Uuid, page: i32) -> StoreResult<()> {
        self.inner.record_page_failure(id, page).await
    }

    async fn complete_batch(&self, id: Uuid) -> StoreResult<Batch> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.complete_batch(id).await
    }

    async fn fail_batch(&self, id: Uuid, message: &str) -> StoreResult<Batch> {
        self.inner.fail_batch(id, message).await
    }

    async fn insert_review(&self, review: NewReview) -> StoreResult<Review> {
        self.inner.insert_review(review).await
    }

    async fn list_reviews(&self, movie_id: Uuid) -> StoreResult<Vec<Review>> {
        self.inner.list_reviews(movie_id).await
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let previous = self.lease_requests.fetch_add(1, Ordering::SeqCst);
        if previous > 0 && self.deny_renewal.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.try_acquire_lease(name, holder, ttl).await
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> StoreResult<()> {
        self.inner.release_lease(name, holder).await
    }
}

fn faulty_driver(
    store: Arc<FaultyStore>,
    provider: StubProvider,
    config: IngestConfig,
) -> IngestDriver {
    init_test_tracing();
    let limiter = Arc::new(RateLimiter::from_config(&config));
    IngestDriver::new(store, Arc::new(provider), limiter, config)
}

#[tokio::test(start_paused = true)]
async fn test_run_is_capped_at_page_ceiling() {
    // 3000 movies at 20 per page is a 150 page ceiling
    let h = harness(StubProvider::with_pages(200, 1), test_ingest_config());

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.pages_planned, 150);
    assert_eq!(summary.pages_succeeded, 150);
    assert_eq!(summary.movies_upserted, 150);

    let calls = h.provider.page_calls();
    assert_eq!(calls.len(), 150, "page 1 is reused from discovery");
    assert_eq!(calls.iter().filter(|&&p| p == 1).count(), 1);
    assert!(calls.iter().all(|&p| p <= 150));

    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.total_pages, Some(150));
    assert_eq!(batch.pages_processed, 150);
    assert_eq!(batch.movies_processed, 150);
    assert!(batch.completed_at.is_some());
    assert_eq!(batch.source_api.as_deref(), Some("STUB"));
    assert_eq!(h.store.count_movies().await.unwrap(), 150);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_creates_no_batch() {
    let provider = StubProvider::with_pages(5, 2);
    provider.fail_page_always(1);
    let h = harness(provider, test_ingest_config());

    let err = h.driver.run_once().await.unwrap_err();

    assert!(matches!(err, IngestError::Discovery(_)));
    assert!(h.store.list_batches(10).await.unwrap().is_empty());
    assert_eq!(h.provider.page_calls(), vec![1]);

    // The lease is released, so the next run may proceed
    h.provider.fail_page(1, 0);
    let summary = h.driver.run_once().await.unwrap();
    assert_eq!(summary.status, BatchStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_held_lease_blocks_run() {
    let h = harness(StubProvider::with_pages(2, 1), test_ingest_config());
    let other = Uuid::new_v4();
    assert!(h
        .store
        .try_acquire_lease(LEASE_NAME, other, Duration::from_secs(900))
        .await
        .unwrap());

    let err = h.driver.run_once().await.unwrap_err();

    assert!(matches!(err, IngestError::LeaseHeld(ref name) if name == LEASE_NAME));
    assert!(h.provider.page_calls().is_empty());
    assert!(h.store.list_batches(10).await.unwrap().is_empty());

    h.store.release_lease(LEASE_NAME, other).await.unwrap();
    assert!(h.driver.run_once().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_transient_page_failure_recovers_on_retry() {
    let provider = StubProvider::with_pages(3, 2);
    provider.fail_page(2, 2);
    let h = harness(provider, test_ingest_config());

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.pages_failed, 0);
    assert_eq!(summary.pages_succeeded, 3);
    assert_eq!(summary.movies_upserted, 6);
    assert_eq!(
        h.provider.page_calls().iter().filter(|&&p| p == 2).count(),
        3
    );

    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.pages_processed, 3);
    assert_eq!(batch.movies_processed, 6);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pages_below_threshold_still_complete() {
    let provider = StubProvider::with_pages(4, 1);
    provider.fail_page_always(3);
    let h = harness(provider, test_ingest_config());

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.failed_pages, vec![3]);
    assert_eq!(summary.pages_succeeded, 3);

    // Failed pages stay visible on the completed batch
    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.total_pages, Some(4));
    assert_eq!(batch.pages_processed, 3);
    assert_eq!(batch.failed_pages, vec![3]);
    assert_eq!(batch.movies_processed, 3);
    assert_eq!(
        batch.error_message.as_deref(),
        Some("Completed with 1 failed page: 3")
    );
    assert_eq!(batch.progress().pages_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_threshold_fails_batch_and_skips_remaining_pages() {
    let provider = StubProvider::with_pages(4, 1);
    provider.fail_page_always(2);
    let config = IngestConfig {
        concurrency: 1,
        max_failed_pages: Some(0),
        ..test_ingest_config()
    };
    let h = harness(provider, config);

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Failed);
    assert_eq!(summary.failed_pages, vec![2]);
    assert_eq!(summary.pages_succeeded, 1);
    assert_eq!(summary.pages_skipped, 2);
    assert!(!h.provider.page_calls().contains(&3));

    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.failed_pages, vec![2]);
    assert!(batch.error_message.as_deref().unwrap().contains("[2]"));
    assert!(batch.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_director_resolved_then_preserved_when_details_unavailable() {
    let provider = StubProvider::with_pages(1, 0);
    provider.set_page(1, vec![raw_movie(42)]);
    provider.set_details(details_with_director(42, "Jane Doe"));
    let h = harness(provider, test_ingest_config());

    h.driver.run_once().await.unwrap();
    let movie = h.store.find_movie_by_external_id("42").await.unwrap().unwrap();
    assert_eq!(movie.director.as_deref(), Some("Jane Doe"));
    assert_eq!(movie.year, Some(2020));
    assert_eq!(movie.title, "Movie 42");

    h.provider.clear_details();
    let second = h.driver.run_once().await.unwrap();

    let movie = h.store.find_movie_by_external_id("42").await.unwrap().unwrap();
    assert_eq!(movie.director.as_deref(), Some("Jane Doe"));
    assert_eq!(movie.batch_id, Some(second.batch_id));
    assert_eq!(movie.fetch_logs.len(), 2);
    let latest = movie.fetch_logs.latest().unwrap();
    assert_eq!(latest.status, FetchStatus::Partial);
    assert_eq!(latest.batch_id, second.batch_id);
    assert_eq!(latest.api_data["id"], 42);
    assert_eq!(h.store.count_movies().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_records_are_skipped() {
    let provider = StubProvider::with_pages(1, 0);
    provider.set_page(
        1,
        vec![
            raw_movie(7),
            RawMovie {
                id: None,
                title: Some("No id".to_string()),
                ..Default::default()
            },
            RawMovie {
                id: Some(8),
                title: Some("   ".to_string()),
                ..Default::default()
            },
        ],
    );
    let h = harness(provider, test_ingest_config());

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.movies_upserted, 1);
    assert_eq!(summary.movies_skipped, 2);
    assert_eq!(h.store.count_movies().await.unwrap(), 1);
    // Records without an id never reach the details endpoint
    assert_eq!(h.provider.detail_calls(), 2);

    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.movies_processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_counters_match_summary_under_concurrency() {
    let config = IngestConfig {
        concurrency: 4,
        max_movies: 200,
        ..test_ingest_config()
    };
    let h = harness(StubProvider::with_pages(30, 5), config);

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.pages_planned, 10);
    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.pages_processed as u32, summary.pages_succeeded);
    assert_eq!(batch.movies_processed as u32, summary.movies_upserted);
    assert_eq!(batch.movies_processed, 50);
    assert_eq!(h.store.count_movies().await.unwrap(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_empty_listing_completes_with_no_pages() {
    let h = harness(StubProvider::with_pages(0, 0), test_ingest_config());

    let summary = h.driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.pages_planned, 0);
    let batch = h.store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.pages_processed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_every_interval_until_shutdown() {
    init_test_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let config = test_ingest_config();
    let driver = Arc::new(IngestDriver::new(
        store.clone(),
        Arc::new(StubProvider::with_pages(1, 1)),
        Arc::new(RateLimiter::from_config(&config)),
        config.clone(),
    ));

    // Ticks at 0s, 60s and 120s
    IngestScheduler::new(driver, config.interval())
        .run_until(tokio::time::sleep(Duration::from_secs(150)))
        .await;

    let batches = store.list_batches(10).await.unwrap();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.status == BatchStatus::Completed));
    assert_eq!(store.count_movies().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_skips_ticks_while_a_run_is_in_flight() {
    init_test_tracing();
    let store = Arc::new(InMemoryCatalogStore::new());
    let config = test_ingest_config();
    // 150 pages of 20 at the default rate limit take far longer than one interval
    let driver = Arc::new(IngestDriver::new(
        store.clone(),
        Arc::new(StubProvider::with_pages(150, 20)),
        Arc::new(RateLimiter::from_config(&config)),
        config.clone(),
    ));

    // Ticks at 60s and 120s land while the first run holds the lease
    IngestScheduler::new(driver, config.interval())
        .run_until(tokio::time::sleep(Duration::from_secs(140)))
        .await;

    let batches = store.list_batches(10).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Completed);
    assert_eq!(batches[0].pages_processed, 150);
    assert_eq!(store.count_movies().await.unwrap(), 3000);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_on_one_driver_exclude_each_other() {
    let h = harness(StubProvider::with_pages(4, 20), test_ingest_config());

    let (first, second) = tokio::join!(h.driver.run_once(), h.driver.run_once());

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(IngestError::LeaseHeld(_)))));
    assert_eq!(h.store.list_batches(10).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lease_is_renewed_while_pages_complete() {
    // 420 provider calls at 40 per 10s outlast the 40s lease
    let config = IngestConfig {
        concurrency: 1,
        max_pages: Some(20),
        max_retries: 1,
        unit_timeout_secs: 30,
        lease_ttl_secs: 40,
        ..test_ingest_config()
    };
    let h = harness(StubProvider::with_pages(20, 20), config);
    let driver = Arc::new(h.driver);

    let run = tokio::spawn({
        let driver = Arc::clone(&driver);
        async move { driver.run_once().await }
    });

    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(!run.is_finished());
    let other = Uuid::new_v4();
    assert!(!h
        .store
        .try_acquire_lease(LEASE_NAME, other, Duration::from_secs(40))
        .await
        .unwrap());

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.pages_succeeded, 20);
    assert!(h
        .store
        .try_acquire_lease(LEASE_NAME, other, Duration::from_secs(40))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_lost_lease_stops_dispatch_and_fails_batch() {
    let store = Arc::new(FaultyStore::default());
    store.deny_renewal.store(true, Ordering::SeqCst);
    let config = IngestConfig {
        concurrency: 1,
        ..test_ingest_config()
    };
    let driver = faulty_driver(store.clone(), StubProvider::with_pages(4, 1), config);

    let summary = driver.run_once().await.unwrap();

    assert_eq!(summary.status, BatchStatus::Failed);
    assert_eq!(summary.pages_succeeded, 1);
    assert_eq!(summary.pages_skipped, 3);

    let batch = store.get_batch(summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(
        batch.error_message.as_deref(),
        Some("Ingestion lease lost after 1 of 4 pages")
    );
}

#[tokio::test(start_paused = true)]
async fn test_completion_error_fails_batch_instead_of_leaving_it_processing() {
    let store = Arc::new(FaultyStore::default());
    store.fail_completion.store(true, Ordering::SeqCst);
    let driver = faulty_driver(
        store.clone(),
        StubProvider::with_pages(2, 1),
        test_ingest_config(),
    );

    let err = driver.run_once().await.unwrap_err();
    assert!(matches!(err, IngestError::Store(StoreError::Database(_))));

    let batches = store.list_batches(10).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert!(batches[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Finalization failed:"));
    assert!(batches[0].completed_at.is_some());

    // The lease is still released
    store.fail_completion.store(false, Ordering::SeqCst);
    assert!(driver.run_once().await.is_ok());
}
