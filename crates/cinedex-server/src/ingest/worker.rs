//! Page work units
//!
//! One unit per listing page: rate-limit, fetch the page (unless the
//! discovery response is reused), fetch details per movie, upsert. A unit
//! is retried as a whole under a [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::provider::{MovieProvider, MoviePage};
use super::rate_limit::RateLimiter;
use super::upsert::MovieUpserter;
use crate::error::{UpsertError, WorkUnitError};

/// Attempts, backoff and per-attempt timeout for work units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before retry N is `backoff[N - 1]`, repeating the last value
    pub backoff: Vec<Duration>,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-indexed)
    pub fn delay_before_retry(&self, failed_attempt: u32) -> Duration {
        let index = (failed_attempt.max(1) - 1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Work for a single listing page
#[derive(Debug, Clone)]
pub struct PageWorkUnit {
    pub batch_id: Uuid,
    pub page: u32,
    /// Listing already fetched during discovery
    pub prefetched: Option<MoviePage>,
}

impl PageWorkUnit {
    pub fn new(batch_id: Uuid, page: u32) -> Self {
        Self {
            batch_id,
            page,
            prefetched: None,
        }
    }

    pub fn with_prefetched(mut self, page: MoviePage) -> Self {
        self.prefetched = Some(page);
        self
    }
}

/// Result of a successful unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub page: u32,
    pub upserted: u32,
    /// Malformed records skipped
    pub skipped: u32,
    pub attempts: u32,
}

/// Executes page work units
#[derive(Clone)]
pub struct PageWorker {
    provider: Arc<dyn MovieProvider>,
    limiter: Arc<RateLimiter>,
    upserter: MovieUpserter,
    policy: RetryPolicy,
}

impl PageWorker {
    pub fn new(
        provider: Arc<dyn MovieProvider>,
        limiter: Arc<RateLimiter>,
        upserter: MovieUpserter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            limiter,
            upserter,
            policy,
        }
    }

    /// Run a unit with retries, returning the last error once attempts run out
    pub async fn run(&self, unit: &PageWorkUnit) -> Result<PageOutcome, WorkUnitError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match timeout(self.policy.attempt_timeout, self.process(unit)).await {
                Ok(result) => result,
                Err(_) => Err(WorkUnitError::Timeout {
                    page: unit.page,
                    timeout: self.policy.attempt_timeout,
                }),
            };

            match result {
                Ok(mut outcome) => {
                    if attempt > 1 {
                        info!(page = unit.page, attempt, "Page recovered after retry");
                    }
                    outcome.attempts = attempt;
                    return Ok(outcome);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.delay_before_retry(attempt);
                    warn!(
                        page = unit.page,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Page attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        batch_id = %unit.batch_id,
                        page = unit.page,
                        attempts = attempt,
                        error = %e,
                        "Page failed after all attempts"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One attempt at a unit
    async fn process(&self, unit: &PageWorkUnit) -> Result<PageOutcome, WorkUnitError> {
        let fetched_at = Utc::now();

        let fetched;
        let listing = match &unit.prefetched {
            Some(listing) => listing,
            None => {
                self.limiter.acquire().await;
                fetched = self.provider.fetch_page(unit.page).await?;
                &fetched
            }
        };

        let mut outcome = PageOutcome {
            page: unit.page,
            ..Default::default()
        };

        for raw in &listing.results {
            let details = match raw.id {
                Some(id) => {
                    self.limiter.acquire().await;
                    self.provider.fetch_details(id).await
                }
                None => None,
            };

            match self
                .upserter
                .upsert(raw, details.as_ref(), fetched_at, unit.batch_id, unit.page)
                .await
            {
                Ok(_) => outcome.upserted += 1,
                Err(UpsertError::Malformed(reason)) => {
                    warn!(page = unit.page, reason = %reason, "Skipping malformed movie record");
                    outcome.skipped += 1;
                }
                Err(UpsertError::Store(e)) => return Err(e.into()),
            }
        }

        debug!(
            page = unit.page,
            upserted = outcome.upserted,
            skipped = outcome.skipped,
            "Page processed"
        );
        Ok(outcome)
    }
}
