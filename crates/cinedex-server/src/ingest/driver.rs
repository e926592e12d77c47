//! Ingestion driver
//!
//! One run of the pipeline:
//! 1. Take the run lease under a holder id unique to this run
//! 2. Discovery: fetch page 1 and cap the page count
//! 3. Create the batch
//! 4. Fan out one work unit per page with bounded concurrency, renewing the
//!    lease as units finish
//! 5. Finalize the batch as completed, or failed past the failure threshold
//!    or when the lease was lost

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::IngestConfig;
use super::coordinator::{BatchCoordinator, CreateBatchParams};
use super::provider::{MovieProvider, MoviePage};
use super::rate_limit::RateLimiter;
use super::upsert::MovieUpserter;
use super::worker::{PageOutcome, PageWorkUnit, PageWorker};
use crate::db::CatalogStore;
use crate::error::{IngestError, StoreError};
use crate::models::BatchStatus;

/// Name of the single-flight lease guarding ingestion runs
pub const LEASE_NAME: &str = "movie-ingest";

/// Statistics for one ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub pages_planned: u32,
    pub pages_succeeded: u32,
    pub pages_failed: u32,
    /// Pages never started because the failure threshold was crossed or the
    /// lease was lost
    pub pages_skipped: u32,
    pub failed_pages: Vec<u32>,
    pub movies_upserted: u32,
    /// Malformed records skipped
    pub movies_skipped: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

enum UnitReport {
    Done(PageOutcome),
    Failed(u32),
    Skipped,
}

/// State shared by the work units of one run
struct RunContext {
    batch_id: Uuid,
    holder: Uuid,
    failed: AtomicU32,
    lease_lost: AtomicBool,
}

/// Runs ingestion batches against a provider and a catalog store
pub struct IngestDriver {
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn MovieProvider>,
    limiter: Arc<RateLimiter>,
    coordinator: BatchCoordinator,
    worker: PageWorker,
    config: IngestConfig,
}

impl IngestDriver {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn MovieProvider>,
        limiter: Arc<RateLimiter>,
        config: IngestConfig,
    ) -> Self {
        let worker = PageWorker::new(
            Arc::clone(&provider),
            Arc::clone(&limiter),
            MovieUpserter::new(Arc::clone(&store)),
            config.retry_policy(),
        );

        Self {
            coordinator: BatchCoordinator::new(Arc::clone(&store)),
            store,
            provider,
            limiter,
            worker,
            config,
        }
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    /// Execute one run under the lease
    ///
    /// Every call takes the lease with a fresh holder id, so a run that is
    /// still going blocks the next call even on the same driver.
    pub async fn run_once(&self) -> Result<RunSummary, IngestError> {
        let holder = Uuid::new_v4();
        let acquired = self
            .store
            .try_acquire_lease(LEASE_NAME, holder, self.config.lease_ttl())
            .await?;
        if !acquired {
            return Err(IngestError::LeaseHeld(LEASE_NAME.to_string()));
        }

        let result = self.run_batch(holder).await;

        if let Err(e) = self.store.release_lease(LEASE_NAME, holder).await {
            warn!(error = %e, "Failed to release ingestion lease, it will expire on its own");
        }

        result
    }

    async fn run_batch(&self, holder: Uuid) -> Result<RunSummary, IngestError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(source = self.provider.source_name(), "Starting movie ingestion run");

        self.limiter.acquire().await;
        let discovery = self.provider.fetch_page(1).await.map_err(|e| {
            error!(error = %e, "Discovery request failed, no batch created");
            IngestError::Discovery(e)
        })?;

        let provider_pages = reported_pages(&discovery);
        let total_pages = provider_pages.min(self.config.page_ceiling());

        let batch = self
            .coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(total_pages),
                total_movies: None,
                source_api: Some(self.provider.source_name().to_string()),
                api_endpoint: Some(self.provider.listing_endpoint()),
                fetch_parameters: Some(json!({
                    "max_movies": self.config.max_movies,
                    "movies_per_page": self.config.movies_per_page,
                    "page_ceiling": self.config.page_ceiling(),
                    "provider_total_pages": discovery.total_pages,
                    "provider_total_results": discovery.total_results,
                })),
            })
            .await?;

        info!(
            batch_id = %batch.id,
            total_pages,
            provider_pages,
            concurrency = self.config.concurrency,
            "Dispatching page work units"
        );

        let units = plan_units(batch.id, total_pages, discovery);
        let run = RunContext {
            batch_id: batch.id,
            holder,
            failed: AtomicU32::new(0),
            lease_lost: AtomicBool::new(false),
        };

        let reports: Vec<UnitReport> = stream::iter(units)
            .map(|unit| self.run_unit(unit, &run))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = RunSummary {
            batch_id: batch.id,
            status: batch.status,
            pages_planned: total_pages,
            pages_succeeded: 0,
            pages_failed: 0,
            pages_skipped: 0,
            failed_pages: Vec::new(),
            movies_upserted: 0,
            movies_skipped: 0,
            started_at,
            completed_at: started_at,
            duration_secs: 0.0,
        };
        for report in reports {
            match report {
                UnitReport::Done(outcome) => {
                    summary.pages_succeeded += 1;
                    summary.movies_upserted += outcome.upserted;
                    summary.movies_skipped += outcome.skipped;
                }
                UnitReport::Failed(page) => {
                    summary.pages_failed += 1;
                    summary.failed_pages.push(page);
                }
                UnitReport::Skipped => summary.pages_skipped += 1,
            }
        }
        summary.failed_pages.sort_unstable();

        let failure = if run.lease_lost.load(Ordering::SeqCst) {
            Some(format!(
                "Ingestion lease lost after {} of {} pages",
                summary.pages_succeeded + summary.pages_failed,
                total_pages
            ))
        } else if self.threshold_crossed(summary.pages_failed) {
            Some(format!(
                "{} of {} pages failed (threshold {}): {:?}",
                summary.pages_failed,
                total_pages,
                self.config.max_failed_pages.unwrap_or_default(),
                summary.failed_pages
            ))
        } else {
            None
        };

        let finalized = match failure {
            Some(message) => self.coordinator.mark_failed(batch.id, &message).await,
            None => {
                if summary.pages_failed > 0 {
                    warn!(
                        batch_id = %batch.id,
                        failed_pages = ?summary.failed_pages,
                        "Batch finished with failed pages"
                    );
                }
                self.coordinator.mark_completed(batch.id).await
            }
        };
        let final_batch = match finalized {
            Ok(final_batch) => final_batch,
            Err(e) => return Err(self.abandon_batch(batch.id, e).await),
        };

        summary.status = final_batch.status;
        summary.completed_at = Utc::now();
        summary.duration_secs = clock.elapsed().as_secs_f64();

        info!(
            batch_id = %summary.batch_id,
            status = %summary.status,
            pages_succeeded = summary.pages_succeeded,
            pages_failed = summary.pages_failed,
            movies_upserted = summary.movies_upserted,
            duration_secs = summary.duration_secs,
            "Movie ingestion run finished"
        );

        Ok(summary)
    }

    async fn run_unit(&self, unit: PageWorkUnit, run: &RunContext) -> UnitReport {
        if run.lease_lost.load(Ordering::SeqCst)
            || self.threshold_crossed(run.failed.load(Ordering::SeqCst))
        {
            return UnitReport::Skipped;
        }

        let report = match self.worker.run(&unit).await {
            Ok(outcome) => match self
                .coordinator
                .report_page_processed(run.batch_id, outcome.upserted)
                .await
            {
                Ok(()) => UnitReport::Done(outcome),
                Err(e) => {
                    error!(
                        batch_id = %run.batch_id,
                        page = unit.page,
                        error = %e,
                        "Failed to record page progress"
                    );
                    self.record_failure(run, unit.page, &e.to_string()).await
                }
            },
            Err(e) => self.record_failure(run, unit.page, &e.to_string()).await,
        };

        self.renew_lease(run).await;
        report
    }

    async fn record_failure(&self, run: &RunContext, page: u32, reason: &str) -> UnitReport {
        run.failed.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self
            .coordinator
            .report_page_failed(run.batch_id, page, reason)
            .await
        {
            error!(batch_id = %run.batch_id, page, error = %e, "Failed to record page failure");
        }
        UnitReport::Failed(page)
    }

    /// Extend the lease after a unit; losing it stops further dispatch
    async fn renew_lease(&self, run: &RunContext) {
        if run.lease_lost.load(Ordering::SeqCst) {
            return;
        }

        match self
            .store
            .try_acquire_lease(LEASE_NAME, run.holder, self.config.lease_ttl())
            .await
        {
            Ok(true) => debug!(batch_id = %run.batch_id, "Ingestion lease renewed"),
            Ok(false) => {
                if !run.lease_lost.swap(true, Ordering::SeqCst) {
                    error!(
                        batch_id = %run.batch_id,
                        lease = LEASE_NAME,
                        "Ingestion lease taken by another run, skipping remaining pages"
                    );
                }
            }
            Err(e) => warn!(batch_id = %run.batch_id, error = %e, "Failed to renew ingestion lease"),
        }
    }

    /// Fail a batch whose finalization errored so it does not stay processing
    async fn abandon_batch(&self, batch_id: Uuid, cause: StoreError) -> IngestError {
        error!(%batch_id, error = %cause, "Failed to finalize batch");

        let message = format!("Finalization failed: {cause}");
        if let Err(e) = self.coordinator.mark_failed(batch_id, &message).await {
            error!(%batch_id, error = %e, "Batch could not be marked failed and is left unfinalized");
        }
        IngestError::Store(cause)
    }

    fn threshold_crossed(&self, failed_pages: u32) -> bool {
        self.config
            .max_failed_pages
            .is_some_and(|max| failed_pages > max)
    }
}

/// Page count the provider reports, at least 1 when page 1 has results
fn reported_pages(discovery: &MoviePage) -> u32 {
    if discovery.total_pages == 0 && !discovery.results.is_empty() {
        1
    } else {
        discovery.total_pages
    }
}

/// Units for pages `1..=total_pages`, page 1 carrying the discovery listing
fn plan_units(batch_id: Uuid, total_pages: u32, discovery: MoviePage) -> Vec<PageWorkUnit> {
    let mut discovery = Some(discovery);
    (1..=total_pages)
        .map(|page| {
            let unit = PageWorkUnit::new(batch_id, page);
            match (page, discovery.take()) {
                (1, Some(listing)) => unit.with_prefetched(listing),
                _ => unit,
            }
        })
        .collect()
}
