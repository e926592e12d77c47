//! Maps provider records onto catalog movies

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tracing::debug;
use uuid::Uuid;

use super::provider::{MovieDetails, RawMovie};
use crate::db::CatalogStore;
use crate::error::UpsertError;
use crate::models::{CreditsLookup, FetchLogEntry, FetchStatus, Movie, MovieUpsert};

/// Create-or-update of movies keyed on the provider id
#[derive(Clone)]
pub struct MovieUpserter {
    store: Arc<dyn CatalogStore>,
}

impl MovieUpserter {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Upsert one listing record and append a fetch log entry.
    ///
    /// `details` is `None` when the detail request failed; the stored
    /// director is left untouched in that case.
    pub async fn upsert(
        &self,
        raw: &RawMovie,
        details: Option<&MovieDetails>,
        fetched_at: DateTime<Utc>,
        batch_id: Uuid,
        page: u32,
    ) -> Result<Movie, UpsertError> {
        let upsert = map_movie(raw, details, batch_id)?;

        let entry = FetchLogEntry {
            fetched_at,
            completed_at: Utc::now(),
            status: if details.is_some() {
                FetchStatus::Success
            } else {
                FetchStatus::Partial
            },
            page,
            batch_id,
            api_data: raw.to_json(),
        };

        let movie = self.store.upsert_movie(&upsert, entry).await?;
        debug!(external_id = %movie.external_id, %batch_id, page, "Movie stored");
        Ok(movie)
    }
}

/// Build upsert values from a listing record and optional details
pub fn map_movie(
    raw: &RawMovie,
    details: Option<&MovieDetails>,
    batch_id: Uuid,
) -> Result<MovieUpsert, UpsertError> {
    let external_id = raw
        .id
        .ok_or_else(|| UpsertError::Malformed("missing id".to_string()))?;

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| UpsertError::Malformed(format!("movie {external_id} has no title")))?;

    Ok(MovieUpsert {
        external_id: external_id.to_string(),
        title: title.to_string(),
        description: raw.overview.clone().filter(|o| !o.is_empty()),
        year: raw.release_date.as_deref().and_then(release_year),
        director: match details {
            Some(details) => CreditsLookup::Resolved(details.director()),
            None => CreditsLookup::Unavailable,
        },
        batch_id: Some(batch_id),
    })
}

/// Year of a `YYYY-MM-DD` release date; empty or malformed dates yield `None`
pub fn release_year(date: &str) -> Option<i32> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalogStore;
    use crate::models::FETCH_LOG_CAPACITY;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawMovie {
        serde_json::from_value(value).unwrap()
    }

    fn details(director: &str) -> MovieDetails {
        serde_json::from_value(json!({
            "credits": { "crew": [{ "job": "Director", "name": director }] }
        }))
        .unwrap()
    }

    #[test]
    fn test_release_year() {
        assert_eq!(release_year("2020-05-01"), Some(2020));
        assert_eq!(release_year(""), None);
        assert_eq!(release_year("2020"), None);
        assert_eq!(release_year("2020-13-40"), None);
    }

    #[test]
    fn test_map_movie_without_details() {
        let upsert = map_movie(
            &raw(json!({ "id": 42, "title": "X", "release_date": "2020-05-01" })),
            None,
            Uuid::nil(),
        )
        .unwrap();

        assert_eq!(upsert.external_id, "42");
        assert_eq!(upsert.title, "X");
        assert_eq!(upsert.year, Some(2020));
        assert_eq!(upsert.description, None);
        assert_eq!(upsert.director, CreditsLookup::Unavailable);
    }

    #[test]
    fn test_map_movie_rejects_missing_id_or_title() {
        let err = map_movie(&raw(json!({ "title": "X" })), None, Uuid::nil()).unwrap_err();
        assert!(matches!(err, UpsertError::Malformed(_)));

        let err = map_movie(&raw(json!({ "id": 1, "title": "  " })), None, Uuid::nil()).unwrap_err();
        assert!(matches!(err, UpsertError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_external_id() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let upserter = MovieUpserter::new(store.clone());
        let record = raw(json!({ "id": 7, "title": "Seven", "overview": "Rain." }));

        let first = upserter
            .upsert(&record, Some(&details("Fincher")), Utc::now(), Uuid::nil(), 1)
            .await
            .unwrap();
        let second = upserter
            .upsert(&record, None, Utc::now(), Uuid::nil(), 2)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.director.as_deref(), Some("Fincher"));
        assert_eq!(second.fetch_logs.len(), 2);
        assert_eq!(second.fetch_logs.latest().map(|e| e.status), Some(FetchStatus::Partial));
        assert_eq!(store.count_movies().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_log_bounded_to_last_ten() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let upserter = MovieUpserter::new(store);
        let record = raw(json!({ "id": 9, "title": "Nine" }));

        let mut movie = None;
        for page in 1..=15 {
            movie = Some(
                upserter
                    .upsert(&record, None, Utc::now(), Uuid::nil(), page)
                    .await
                    .unwrap(),
            );
        }

        let movie = movie.unwrap();
        assert_eq!(movie.fetch_logs.len(), FETCH_LOG_CAPACITY);
        let pages: Vec<u32> = movie.fetch_logs.iter().map(|e| e.page).collect();
        assert_eq!(pages, (6..=15).collect::<Vec<_>>());
        assert_eq!(movie.fetch_logs.latest().unwrap().api_data["id"], json!(9));
    }
}
