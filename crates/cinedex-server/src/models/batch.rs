//! Ingestion batch records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Processing)
                | (BatchStatus::Pending, BatchStatus::Failed)
                | (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

/// One ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub total_pages: Option<i32>,
    pub pages_processed: i32,
    pub total_movies: Option<i32>,
    pub movies_processed: i32,
    /// Pages whose work unit ran out of retries, in report order
    pub failed_pages: Vec<i32>,
    /// Failure reason, or the failed-page note of a completed batch
    pub error_message: Option<String>,
    pub source_api: Option<String>,
    pub api_endpoint: Option<String>,
    pub fetch_parameters: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Build a batch from creation parameters
    pub fn from_new(new: NewBatch, now: DateTime<Utc>) -> Self {
        let status = new.initial_status();
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            completed_at: None,
            status,
            total_pages: new.total_pages,
            pages_processed: 0,
            total_movies: new.total_movies,
            movies_processed: 0,
            failed_pages: Vec::new(),
            error_message: None,
            source_api: new.source_api,
            api_endpoint: new.api_endpoint,
            fetch_parameters: new.fetch_parameters,
            created_at: now,
            updated_at: now,
        }
    }

    /// Percentage of expected movies processed, 0 when the total is unknown
    pub fn success_rate(&self) -> f64 {
        match self.total_movies {
            Some(total) if total > 0 => {
                let rate = f64::from(self.movies_processed) / f64::from(total) * 100.0;
                (rate * 100.0).round() / 100.0
            }
            _ => 0.0,
        }
    }

    /// Wall time from start to completion, `None` while still running
    pub fn processing_time(&self) -> Option<Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }

    pub fn pages_failed(&self) -> i32 {
        i32::try_from(self.failed_pages.len()).unwrap_or(i32::MAX)
    }

    /// Settle counters on completion: every planned page either succeeded
    /// or is listed in `failed_pages`.
    pub fn reconcile_counters(&mut self) {
        if let Some(total) = self.total_pages {
            self.pages_processed = (total - self.pages_failed()).max(0);
        }
        if let Some(total) = self.total_movies {
            self.movies_processed = total;
        }
    }

    /// Note recorded on a batch that completed with failed pages
    pub fn completion_note(&self) -> Option<String> {
        failed_pages_note(&self.failed_pages)
    }

    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == BatchStatus::Failed
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress::from(self)
    }
}

/// `Completed with 2 failed pages: 3, 7`, or `None` without failures
pub fn failed_pages_note(failed_pages: &[i32]) -> Option<String> {
    if failed_pages.is_empty() {
        return None;
    }
    let mut pages = failed_pages.to_vec();
    pages.sort_unstable();
    let list = pages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "Completed with {} failed page{}: {}",
        pages.len(),
        if pages.len() == 1 { "" } else { "s" },
        list
    ))
}

/// Parameters for creating a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBatch {
    pub total_pages: Option<i32>,
    pub total_movies: Option<i32>,
    pub source_api: Option<String>,
    pub api_endpoint: Option<String>,
    pub fetch_parameters: Option<serde_json::Value>,
}

impl NewBatch {
    /// Batches whose page count is known start out processing
    pub fn initial_status(&self) -> BatchStatus {
        if self.total_pages.is_some() {
            BatchStatus::Processing
        } else {
            BatchStatus::Pending
        }
    }
}

/// Point-in-time view of batch counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub pages_processed: i32,
    pub pages_failed: i32,
    pub total_pages: Option<i32>,
    pub movies_processed: i32,
    pub total_movies: Option<i32>,
    /// Share of pages processed, 0-100
    pub percent_complete: f64,
    pub success_rate: f64,
    pub processing_time_secs: Option<i64>,
}

impl From<&Batch> for BatchProgress {
    fn from(batch: &Batch) -> Self {
        let percent_complete = match batch.total_pages {
            Some(total) if total > 0 => {
                (f64::from(batch.pages_processed) / f64::from(total) * 100.0).min(100.0)
            }
            Some(_) if batch.is_complete() => 100.0,
            _ => 0.0,
        };
        Self {
            batch_id: batch.id,
            status: batch.status,
            pages_processed: batch.pages_processed,
            pages_failed: batch.pages_failed(),
            total_pages: batch.total_pages,
            movies_processed: batch.movies_processed,
            total_movies: batch.total_movies,
            percent_complete,
            success_rate: batch.success_rate(),
            processing_time_secs: batch.processing_time().map(|d| d.num_seconds()),
        }
    }
}
