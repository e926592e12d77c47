//! Movie entity and its bounded fetch audit log

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of fetch log entries kept per movie.
pub const FETCH_LOG_CAPACITY: usize = 10;

/// Catalog movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: Uuid,
    /// Provider identifier, unique across the catalog
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub director: Option<String>,
    pub year: Option<i32>,
    /// Batch that last touched this movie
    pub batch_id: Option<Uuid>,
    pub fetch_logs: FetchLog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movie {
    /// When the provider record was last fetched
    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.fetch_logs.latest().map(|entry| entry.fetched_at)
    }

    /// Build a fresh movie from upsert values. Used by stores on first insert.
    pub fn from_upsert(upsert: &MovieUpsert, now: DateTime<Utc>) -> Self {
        let mut movie = Self {
            id: Uuid::new_v4(),
            external_id: upsert.external_id.clone(),
            title: String::new(),
            description: None,
            director: None,
            year: None,
            batch_id: None,
            fetch_logs: FetchLog::default(),
            created_at: now,
            updated_at: now,
        };
        movie.apply(upsert, now);
        movie
    }

    /// Overwrite the mutable attributes with freshly fetched values
    pub fn apply(&mut self, upsert: &MovieUpsert, now: DateTime<Utc>) {
        self.title = upsert.title.clone();
        self.description = upsert.description.clone();
        self.year = upsert.year;
        if let CreditsLookup::Resolved(director) = &upsert.director {
            self.director = director.clone();
        }
        self.batch_id = upsert.batch_id;
        self.updated_at = now;
    }
}

/// Outcome of the credits lookup for a movie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditsLookup {
    /// Details were fetched; the director may still be absent
    Resolved(Option<String>),
    /// Details could not be fetched, keep whatever is stored
    Unavailable,
}

/// Attribute values for a create-or-update keyed on `external_id`
#[derive(Debug, Clone, PartialEq)]
pub struct MovieUpsert {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub director: CreditsLookup,
    pub batch_id: Option<Uuid>,
}

/// Status recorded for a fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Listing record and details were both fetched
    Success,
    /// Listing record stored, details request failed
    Partial,
}

/// One fetch audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLogEntry {
    pub fetched_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: FetchStatus,
    pub page: u32,
    pub batch_id: Uuid,
    /// Raw provider payload as received
    pub api_data: serde_json::Value,
}

/// Fixed-capacity, oldest-first audit log
///
/// Pushing past [`FETCH_LOG_CAPACITY`] evicts the oldest entry, so the log
/// always holds the most recent fetches in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<FetchLogEntry>", into = "Vec<FetchLogEntry>")]
pub struct FetchLog {
    entries: VecDeque<FetchLogEntry>,
}

impl FetchLog {
    pub fn push(&mut self, entry: FetchLogEntry) {
        while self.entries.len() >= FETCH_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn latest(&self) -> Option<&FetchLogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchLogEntry> {
        self.entries.iter()
    }
}

impl From<Vec<FetchLogEntry>> for FetchLog {
    fn from(entries: Vec<FetchLogEntry>) -> Self {
        let mut log = FetchLog::default();
        for entry in entries {
            log.push(entry);
        }
        log
    }
}

impl From<FetchLog> for Vec<FetchLogEntry> {
    fn from(log: FetchLog) -> Self {
        log.entries.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(page: u32, at: DateTime<Utc>) -> FetchLogEntry {
        FetchLogEntry {
            fetched_at: at,
            completed_at: at,
            status: FetchStatus::Success,
            page,
            batch_id: Uuid::nil(),
            api_data: serde_json::json!({ "id": page }),
        }
    }

    fn upsert(director: CreditsLookup) -> MovieUpsert {
        MovieUpsert {
            external_id: "42".to_string(),
            title: "X".to_string(),
            description: None,
            year: Some(2020),
            director,
            batch_id: Some(Uuid::nil()),
        }
    }

    #[test]
    fn test_fetch_log_evicts_oldest() {
        let start = Utc::now();
        let mut log = FetchLog::default();
        for page in 1..=15 {
            log.push(entry(page, start + Duration::seconds(page as i64)));
        }

        assert_eq!(log.len(), FETCH_LOG_CAPACITY);
        let pages: Vec<u32> = log.iter().map(|e| e.page).collect();
        assert_eq!(pages, (6..=15).collect::<Vec<_>>());
        assert_eq!(log.latest().map(|e| e.page), Some(15));
    }

    #[test]
    fn test_fetch_log_deserialize_trims_to_capacity() {
        let start = Utc::now();
        let raw: Vec<FetchLogEntry> = (1..=12).map(|p| entry(p, start)).collect();
        let json = serde_json::to_value(&raw).unwrap();

        let log: FetchLog = serde_json::from_value(json).unwrap();
        assert_eq!(log.len(), FETCH_LOG_CAPACITY);
        assert_eq!(log.iter().next().map(|e| e.page), Some(3));
    }

    #[test]
    fn test_fetch_status_serializes_snake_case() {
        let value = serde_json::to_value(FetchStatus::Success).unwrap();
        assert_eq!(value, serde_json::json!("success"));
    }

    #[test]
    fn test_apply_keeps_director_when_credits_unavailable() {
        let now = Utc::now();
        let mut movie = Movie::from_upsert(
            &upsert(CreditsLookup::Resolved(Some("Jane Doe".to_string()))),
            now,
        );
        assert_eq!(movie.director.as_deref(), Some("Jane Doe"));

        movie.apply(&upsert(CreditsLookup::Unavailable), now);
        assert_eq!(movie.director.as_deref(), Some("Jane Doe"));

        movie.apply(&upsert(CreditsLookup::Resolved(None)), now);
        assert_eq!(movie.director, None);
    }

    #[test]
    fn test_last_fetched_uses_newest_entry() {
        let start = Utc::now();
        let mut movie = Movie::from_upsert(&upsert(CreditsLookup::Unavailable), start);
        assert_eq!(movie.last_fetched(), None);

        movie.fetch_logs.push(entry(1, start));
        movie.fetch_logs.push(entry(2, start + Duration::minutes(5)));
        assert_eq!(movie.last_fetched(), Some(start + Duration::minutes(5)));
    }
}
