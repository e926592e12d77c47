//! Batch coordinator
//!
//! Owns the lifecycle of one ingestion batch:
//! 1. Create the batch record (processing once the page count is known)
//! 2. Accumulate per-page progress and failures reported by work units
//! 3. Finalize as completed (noting failed pages) or failed

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::CatalogStore;
use crate::error::StoreError;
use crate::models::{Batch, BatchProgress, NewBatch};

/// Parameters for a new ingestion batch
#[derive(Debug, Clone, Default)]
pub struct CreateBatchParams {
    pub total_pages: Option<u32>,
    pub total_movies: Option<u32>,
    pub source_api: Option<String>,
    pub api_endpoint: Option<String>,
    pub fetch_parameters: Option<serde_json::Value>,
}

/// Tracks batch state in the catalog store
#[derive(Clone)]
pub struct BatchCoordinator {
    store: Arc<dyn CatalogStore>,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Create a new batch
    pub async fn create_batch(&self, params: CreateBatchParams) -> Result<Batch, StoreError> {
        let batch = self
            .store
            .insert_batch(NewBatch {
                total_pages: params.total_pages.map(clamp_i32),
                total_movies: params.total_movies.map(clamp_i32),
                source_api: params.source_api,
                api_endpoint: params.api_endpoint,
                fetch_parameters: params.fetch_parameters,
            })
            .await?;

        info!(
            batch_id = %batch.id,
            status = %batch.status,
            total_pages = ?batch.total_pages,
            "Batch created"
        );
        Ok(batch)
    }

    /// Move a pending batch to processing once its page count is known
    pub async fn start_processing(&self, batch_id: Uuid, total_pages: u32) -> Result<Batch, StoreError> {
        let batch = self.store.start_batch(batch_id, clamp_i32(total_pages)).await?;
        info!(%batch_id, total_pages, "Batch processing started");
        Ok(batch)
    }

    /// Record one finished page and the movies it stored
    pub async fn report_page_processed(
        &self,
        batch_id: Uuid,
        movies_processed: u32,
    ) -> Result<(), StoreError> {
        self.store
            .increment_batch_progress(batch_id, 1, clamp_i32(movies_processed))
            .await
    }

    /// Record a page whose work unit exhausted its retries
    pub async fn report_page_failed(
        &self,
        batch_id: Uuid,
        page: u32,
        error: &str,
    ) -> Result<(), StoreError> {
        warn!(%batch_id, page, error, "Page failed, recording on batch");
        self.store.record_page_failure(batch_id, clamp_i32(page)).await
    }

    /// Finalize as completed, reconciling counters with known totals
    pub async fn mark_completed(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        let batch = self.store.complete_batch(batch_id).await?;
        info!(
            %batch_id,
            pages_processed = batch.pages_processed,
            pages_failed = batch.pages_failed(),
            movies_processed = batch.movies_processed,
            processing_secs = ?batch.processing_time().map(|d| d.num_seconds()),
            "Batch completed"
        );
        Ok(batch)
    }

    /// Finalize as failed with an error message
    pub async fn mark_failed(&self, batch_id: Uuid, message: &str) -> Result<Batch, StoreError> {
        let batch = self.store.fail_batch(batch_id, message).await?;
        warn!(
            %batch_id,
            pages_processed = batch.pages_processed,
            error = message,
            "Batch failed"
        );
        Ok(batch)
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        self.store.get_batch(batch_id).await
    }

    pub async fn progress(&self, batch_id: Uuid) -> Result<BatchProgress, StoreError> {
        Ok(self.store.get_batch(batch_id).await?.progress())
    }

    pub async fn recent_batches(&self, limit: i64) -> Result<Vec<Batch>, StoreError> {
        self.store.list_batches(limit).await
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalogStore;
    use crate::models::BatchStatus;

    fn coordinator() -> BatchCoordinator {
        BatchCoordinator::new(Arc::new(InMemoryCatalogStore::new()))
    }

    #[tokio::test]
    async fn test_create_batch_status_follows_page_count() {
        let coordinator = coordinator();

        let pending = coordinator.create_batch(CreateBatchParams::default()).await.unwrap();
        assert_eq!(pending.status, BatchStatus::Pending);

        let started = coordinator.start_processing(pending.id, 4).await.unwrap();
        assert_eq!(started.status, BatchStatus::Processing);
        assert_eq!(started.total_pages, Some(4));

        let known = coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(3),
                source_api: Some("TMDB".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(known.status, BatchStatus::Processing);
        assert!(coordinator.start_processing(known.id, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_reports_are_all_counted() {
        let coordinator = coordinator();
        let batch = coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(50),
                ..Default::default()
            })
            .await
            .unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.report_page_processed(batch.id, 20).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let progress = coordinator.progress(batch.id).await.unwrap();
        assert_eq!(progress.pages_processed, 50);
        assert_eq!(progress.movies_processed, 1000);
        assert_eq!(progress.percent_complete, 100.0);
    }

    #[tokio::test]
    async fn test_movies_processed_never_exceeds_known_total() {
        let coordinator = coordinator();
        let batch = coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(2),
                total_movies: Some(30),
                ..Default::default()
            })
            .await
            .unwrap();

        coordinator.report_page_processed(batch.id, 20).await.unwrap();
        coordinator.report_page_processed(batch.id, 20).await.unwrap();

        let batch = coordinator.get_batch(batch.id).await.unwrap();
        assert_eq!(batch.movies_processed, 30);
        assert_eq!(batch.success_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_mark_completed_reconciles_counters() {
        let coordinator = coordinator();
        let batch = coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(5),
                total_movies: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        coordinator.report_page_processed(batch.id, 18).await.unwrap();

        let done = coordinator.mark_completed(batch.id).await.unwrap();
        assert!(done.is_complete());
        assert_eq!(done.pages_processed, 5);
        assert_eq!(done.movies_processed, 100);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_pages_are_kept_on_completed_batch() {
        let coordinator = coordinator();
        let batch = coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(4),
                ..Default::default()
            })
            .await
            .unwrap();

        coordinator.report_page_processed(batch.id, 20).await.unwrap();
        coordinator.report_page_failed(batch.id, 4, "HTTP 503").await.unwrap();
        coordinator.report_page_processed(batch.id, 20).await.unwrap();
        coordinator.report_page_failed(batch.id, 2, "timed out").await.unwrap();

        let done = coordinator.mark_completed(batch.id).await.unwrap();
        assert!(done.is_complete());
        assert_eq!(done.failed_pages, vec![4, 2]);
        assert_eq!(done.pages_processed, 2);
        assert_eq!(
            done.error_message.as_deref(),
            Some("Completed with 2 failed pages: 2, 4")
        );
        assert_eq!(done.progress().pages_failed, 2);
        assert!(coordinator.report_page_failed(batch.id, 3, "late").await.is_err());
    }

    #[tokio::test]
    async fn test_pending_batch_cannot_complete() {
        let coordinator = coordinator();
        let pending = coordinator.create_batch(CreateBatchParams::default()).await.unwrap();

        let err = coordinator.mark_completed(pending.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: BatchStatus::Pending,
                to: BatchStatus::Completed,
                ..
            }
        ));
        assert!(coordinator.mark_failed(pending.id, "aborted").await.is_ok());
    }

    #[tokio::test]
    async fn test_terminal_batches_reject_further_transitions() {
        let coordinator = coordinator();
        let batch = coordinator
            .create_batch(CreateBatchParams {
                total_pages: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();

        let failed = coordinator.mark_failed(batch.id, "provider down").await.unwrap();
        assert!(failed.is_failed());
        assert_eq!(failed.error_message.as_deref(), Some("provider down"));

        let err = coordinator.mark_completed(batch.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: BatchStatus::Failed,
                to: BatchStatus::Completed,
                ..
            }
        ));
        assert!(coordinator.report_page_processed(batch.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let err = coordinator().get_batch(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "Batch", .. }));
    }
}
