//! In-memory [`CatalogStore`] used by tests and dry runs

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{CatalogStore, StoreResult};
use crate::catalog::{MovieSearch, Paginated, SortField, SortOrder};
use crate::error::StoreError;
use crate::models::{
    Batch, BatchStatus, FetchLogEntry, Movie, MovieUpsert, NewBatch, NewReview, Review,
};

#[derive(Debug, Default)]
struct State {
    movies: HashMap<Uuid, Movie>,
    by_external_id: HashMap<String, Uuid>,
    batches: HashMap<Uuid, Batch>,
    reviews: Vec<Review>,
    leases: HashMap<String, Lease>,
}

/// Lease expiry follows the tokio clock so paused-time tests can observe it
#[derive(Debug, Clone)]
struct Lease {
    holder: Uuid,
    /// `None` when the TTL is too large to represent
    expires_at: Option<Instant>,
}

/// Mutex-guarded catalog held in process memory
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: Mutex<State>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a terminal transition, rejecting batches already finalized
    fn finalize(
        &self,
        id: Uuid,
        to: BatchStatus,
        update: impl FnOnce(&mut Batch),
    ) -> StoreResult<Batch> {
        let mut state = self.state();
        let batch = state
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::batch_not_found(id))?;

        if !batch.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: batch.status,
                to,
            });
        }

        let now = Utc::now();
        batch.status = to;
        batch.completed_at = Some(now);
        batch.updated_at = now;
        update(batch);
        Ok(batch.clone())
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn upsert_movie(&self, upsert: &MovieUpsert, entry: FetchLogEntry) -> StoreResult<Movie> {
        let now = Utc::now();
        let mut state = self.state();

        let id = match state.by_external_id.get(&upsert.external_id) {
            Some(id) => *id,
            None => {
                let movie = Movie::from_upsert(upsert, now);
                let id = movie.id;
                state.by_external_id.insert(upsert.external_id.clone(), id);
                state.movies.insert(id, movie);
                id
            }
        };

        let movie = state
            .movies
            .get_mut(&id)
            .ok_or_else(|| StoreError::movie_not_found(id))?;
        movie.apply(upsert, now);
        movie.fetch_logs.push(entry);
        Ok(movie.clone())
    }

    async fn find_movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        Ok(self.state().movies.get(&id).cloned())
    }

    async fn find_movie_by_external_id(&self, external_id: &str) -> StoreResult<Option<Movie>> {
        let state = self.state();
        Ok(state
            .by_external_id
            .get(external_id)
            .and_then(|id| state.movies.get(id))
            .cloned())
    }

    async fn search_movies(&self, search: &MovieSearch) -> StoreResult<Paginated<Movie>> {
        let state = self.state();
        let query = search.query.as_deref().map(str::to_lowercase);
        let director = search.director.as_deref().map(str::to_lowercase);

        let mut matches: Vec<&Movie> = state
            .movies
            .values()
            .filter(|m| match &query {
                Some(q) => {
                    m.title.to_lowercase().contains(q)
                        || m
                            .description
                            .as_deref()
                            .is_some_and(|d| d.to_lowercase().contains(q))
                }
                None => true,
            })
            .filter(|m| search.year.is_none_or(|year| m.year == Some(year)))
            .filter(|m| match &director {
                Some(d) => m
                    .director
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(d)),
                None => true,
            })
            .collect();

        matches.sort_by(|a, b| {
            let ordering = match search.sort_by {
                SortField::Title => a.title.cmp(&b.title),
                SortField::Year => nulls_last(a.year, b.year),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            let ordering = match search.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });

        let total = matches.len() as i64;
        let items = matches
            .into_iter()
            .skip(search.offset() as usize)
            .take(search.per_page as usize)
            .cloned()
            .collect();

        Ok(Paginated {
            items,
            page: search.page,
            per_page: search.per_page,
            total,
        })
    }

    async fn count_movies(&self) -> StoreResult<i64> {
        Ok(self.state().movies.len() as i64)
    }

    async fn insert_batch(&self, new: NewBatch) -> StoreResult<Batch> {
        let batch = Batch::from_new(new, Utc::now());
        self.state().batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Batch> {
        self.state()
            .batches
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::batch_not_found(id))
    }

    async fn list_batches(&self, limit: i64) -> StoreResult<Vec<Batch>> {
        let state = self.state();
        let mut batches: Vec<Batch> = state.batches.values().cloned().collect();
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        batches.truncate(limit.max(0) as usize);
        Ok(batches)
    }

    async fn start_batch(&self, id: Uuid, total_pages: i32) -> StoreResult<Batch> {
        let mut state = self.state();
        let batch = state
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::batch_not_found(id))?;

        if batch.status != BatchStatus::Pending {
            return Err(StoreError::InvalidTransition {
                id,
                from: batch.status,
                to: BatchStatus::Processing,
            });
        }

        batch.status = BatchStatus::Processing;
        batch.total_pages = Some(total_pages);
        batch.updated_at = Utc::now();
        Ok(batch.clone())
    }

    async fn increment_batch_progress(
        &self,
        id: Uuid,
        pages: i32,
        movies: i32,
    ) -> StoreResult<()> {
        let mut state = self.state();
        let batch = state
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::batch_not_found(id))?;

        if !batch.is_active() {
            return Err(StoreError::InvalidTransition {
                id,
                from: batch.status,
                to: BatchStatus::Processing,
            });
        }

        batch.pages_processed += pages;
        batch.movies_processed += movies;
        if let Some(total) = batch.total_movies {
            batch.movies_processed = batch.movies_processed.min(total);
        }
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn record_page_failure(&self, id: Uuid, page: i32) -> StoreResult<()> {
        let mut state = self.state();
        let batch = state
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::batch_not_found(id))?;

        if !batch.is_active() {
            return Err(StoreError::InvalidTransition {
                id,
                from: batch.status,
                to: BatchStatus::Processing,
            });
        }

        batch.failed_pages.push(page);
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_batch(&self, id: Uuid) -> StoreResult<Batch> {
        self.finalize(id, BatchStatus::Completed, |batch| {
            batch.reconcile_counters();
            if let Some(note) = batch.completion_note() {
                batch.error_message = Some(note);
            }
        })
    }

    async fn fail_batch(&self, id: Uuid, message: &str) -> StoreResult<Batch> {
        self.finalize(id, BatchStatus::Failed, |batch| {
            batch.error_message = Some(message.to_string());
        })
    }

    async fn insert_review(&self, new: NewReview) -> StoreResult<Review> {
        let mut state = self.state();
        if !state.movies.contains_key(&new.movie_id) {
            return Err(StoreError::movie_not_found(new.movie_id));
        }

        let review = Review {
            id: Uuid::new_v4(),
            movie_id: new.movie_id,
            author: new.author,
            comment: new.comment,
            rating: new.rating,
            created_at: Utc::now(),
        };
        state.reviews.push(review.clone());
        Ok(review)
    }

    async fn list_reviews(&self, movie_id: Uuid) -> StoreResult<Vec<Review>> {
        let state = self.state();
        let mut reviews: Vec<Review> = state
            .reviews
            .iter()
            .filter(|r| r.movie_id == movie_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(lease) = state.leases.get(name) {
            let live = lease.expires_at.map_or(true, |expires_at| expires_at > now);
            if lease.holder != holder && live {
                return Ok(false);
            }
        }

        state.leases.insert(
            name.to_string(),
            Lease {
                holder,
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> StoreResult<()> {
        let mut state = self.state();
        if state.leases.get(name).is_some_and(|l| l.holder == holder) {
            state.leases.remove(name);
        }
        Ok(())
    }
}

/// Order optional values with `None` after every `Some`, matching PostgreSQL's
/// ascending default.
fn nulls_last(a: Option<i32>, b: Option<i32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
