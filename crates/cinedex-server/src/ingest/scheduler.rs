//! Fixed-interval ingestion scheduler
//!
//! Each tick spawns a run of the [`IngestDriver`]. Overlapping runs are
//! prevented by the driver's lease, so a tick that lands while a run is
//! still going is skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::driver::IngestDriver;
use crate::error::IngestError;

pub struct IngestScheduler {
    driver: Arc<IngestDriver>,
    interval: Duration,
}

impl IngestScheduler {
    pub fn new(driver: Arc<IngestDriver>, interval: Duration) -> Self {
        Self { driver, interval }
    }

    /// Tick until `shutdown` resolves, then wait for in-flight runs
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(interval_secs = self.interval.as_secs(), "Ingestion scheduler started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut runs = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let driver = Arc::clone(&self.driver);
                    runs.spawn(async move { run_tick(&driver).await });
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Ingestion run task panicked");
                    }
                }
            }
        }

        if !runs.is_empty() {
            info!(in_flight = runs.len(), "Waiting for in-flight ingestion runs");
        }
        while runs.join_next().await.is_some() {}
        info!("Ingestion scheduler stopped");
    }
}

/// Run the driver once and log the outcome
pub async fn run_tick(driver: &IngestDriver) {
    match driver.run_once().await {
        Ok(summary) => info!(
            batch_id = %summary.batch_id,
            status = %summary.status,
            movies_upserted = summary.movies_upserted,
            "Scheduled ingestion finished"
        ),
        Err(IngestError::LeaseHeld(name)) => {
            info!(lease = %name, "Previous ingestion still running, skipping tick")
        }
        Err(e) => warn!(error = %e, "Scheduled ingestion failed"),
    }
}
