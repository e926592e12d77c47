//! PostgreSQL [`CatalogStore`] backed by sqlx

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{CatalogStore, StoreResult};
use crate::catalog::{MovieSearch, Paginated};
use crate::error::StoreError;
use crate::models::{
    Batch, BatchStatus, FetchLog, FetchLogEntry, Movie, MovieUpsert, NewBatch, NewReview, Review,
};

#[derive(Debug, FromRow)]
struct MovieRow {
    id: Uuid,
    external_id: String,
    title: String,
    description: Option<String>,
    director: Option<String>,
    year: Option<i32>,
    batch_id: Option<Uuid>,
    fetch_logs: Json<FetchLog>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MovieRow> for Movie {
    fn from(row: MovieRow) -> Self {
        Self {
            id: row.id,
            external_id: row.external_id,
            title: row.title,
            description: row.description,
            director: row.director,
            year: row.year,
            batch_id: row.batch_id,
            fetch_logs: row.fetch_logs.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    total_pages: Option<i32>,
    pages_processed: i32,
    total_movies: Option<i32>,
    movies_processed: i32,
    failed_pages: Vec<i32>,
    error_message: Option<String>,
    source_api: Option<String>,
    api_endpoint: Option<String>,
    fetch_parameters: Option<Json<serde_json::Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BatchStatus>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(Self {
            id: row.id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status,
            total_pages: row.total_pages,
            pages_processed: row.pages_processed,
            total_movies: row.total_movies,
            movies_processed: row.movies_processed,
            failed_pages: row.failed_pages,
            error_message: row.error_message,
            source_api: row.source_api,
            api_endpoint: row.api_endpoint,
            fetch_parameters: row.fetch_parameters.map(|json| json.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Catalog store over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Explain why a guarded batch update matched no row
    async fn rejected_transition(&self, id: Uuid, to: BatchStatus) -> StoreError {
        match self.get_batch(id).await {
            Ok(batch) => StoreError::InvalidTransition {
                id,
                from: batch.status,
                to,
            },
            Err(err) => err,
        }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn upsert_movie(&self, upsert: &MovieUpsert, entry: FetchLogEntry) -> StoreResult<Movie> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO movies (id, external_id, title, fetch_logs, created_at, updated_at)
            VALUES ($1, $2, $3, '[]'::jsonb, $4, $4)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&upsert.external_id)
        .bind(&upsert.title)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row: MovieRow =
            sqlx::query_as("SELECT * FROM movies WHERE external_id = $1 FOR UPDATE")
                .bind(&upsert.external_id)
                .fetch_one(&mut *tx)
                .await?;

        let mut movie = Movie::from(row);
        movie.apply(upsert, now);
        movie.fetch_logs.push(entry);

        let row: MovieRow = sqlx::query_as(
            r#"
            UPDATE movies
            SET title = $2, description = $3, director = $4, year = $5,
                batch_id = $6, fetch_logs = $7, updated_at = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(movie.id)
        .bind(&movie.title)
        .bind(&movie.description)
        .bind(&movie.director)
        .bind(movie.year)
        .bind(movie.batch_id)
        .bind(Json(&movie.fetch_logs))
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(external_id = %upsert.external_id, movie_id = %row.id, "Movie upserted");
        Ok(row.into())
    }

    async fn find_movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        let row: Option<MovieRow> = sqlx::query_as("SELECT * FROM movies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Movie::from))
    }

    async fn find_movie_by_external_id(&self, external_id: &str) -> StoreResult<Option<Movie>> {
        let row: Option<MovieRow> = sqlx::query_as("SELECT * FROM movies WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Movie::from))
    }

    async fn search_movies(&self, search: &MovieSearch) -> StoreResult<Paginated<Movie>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM movies WHERE TRUE");
        push_filters(&mut count, search);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM movies WHERE TRUE");
        push_filters(&mut select, search);
        select
            .push(" ORDER BY ")
            .push(search.sort_by.column())
            .push(" ")
            .push(search.order.keyword())
            .push(", id ASC LIMIT ")
            .push_bind(search.limit())
            .push(" OFFSET ")
            .push_bind(search.offset());

        let rows: Vec<MovieRow> = select.build_query_as::<MovieRow>().fetch_all(&self.pool).await?;

        Ok(Paginated {
            items: rows.into_iter().map(Movie::from).collect(),
            page: search.page,
            per_page: search.per_page,
            total,
        })
    }

    async fn count_movies(&self) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn insert_batch(&self, new: NewBatch) -> StoreResult<Batch> {
        let status = new.initial_status();
        let row: BatchRow = sqlx::query_as(
            r#"
            INSERT INTO movie_batches (
                id, status, total_pages, total_movies,
                source_api, api_endpoint, fetch_parameters
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(status.as_str())
        .bind(new.total_pages)
        .bind(new.total_movies)
        .bind(&new.source_api)
        .bind(&new.api_endpoint)
        .bind(new.fetch_parameters.map(Json))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Batch> {
        let row: Option<BatchRow> = sqlx::query_as("SELECT * FROM movie_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::batch_not_found(id))?.try_into()
    }

    async fn list_batches(&self, limit: i64) -> StoreResult<Vec<Batch>> {
        let rows: Vec<BatchRow> =
            sqlx::query_as("SELECT * FROM movie_batches ORDER BY started_at DESC LIMIT $1")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Batch::try_from).collect()
    }

    async fn start_batch(&self, id: Uuid, total_pages: i32) -> StoreResult<Batch> {
        let row: Option<BatchRow> = sqlx::query_as(
            r#"
            UPDATE movie_batches
            SET status = 'processing', total_pages = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(total_pages)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_transition(id, BatchStatus::Processing).await),
        }
    }

    async fn increment_batch_progress(
        &self,
        id: Uuid,
        pages: i32,
        movies: i32,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE movie_batches
            SET pages_processed = pages_processed + $2,
                movies_processed = LEAST(
                    movies_processed + $3,
                    COALESCE(total_movies, movies_processed + $3)
                ),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(pages)
        .bind(movies)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, BatchStatus::Processing).await);
        }
        Ok(())
    }

    async fn record_page_failure(&self, id: Uuid, page: i32) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE movie_batches
            SET failed_pages = array_append(failed_pages, $2), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(page)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, BatchStatus::Processing).await);
        }
        Ok(())
    }

    async fn complete_batch(&self, id: Uuid) -> StoreResult<Batch> {
        let mut tx = self.pool.begin().await?;

        let row: Option<BatchRow> =
            sqlx::query_as("SELECT * FROM movie_batches WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let mut batch: Batch = row.ok_or_else(|| StoreError::batch_not_found(id))?.try_into()?;

        if !batch.status.can_transition_to(BatchStatus::Completed) {
            return Err(StoreError::InvalidTransition {
                id,
                from: batch.status,
                to: BatchStatus::Completed,
            });
        }
        batch.reconcile_counters();

        let row: BatchRow = sqlx::query_as(
            r#"
            UPDATE movie_batches
            SET status = 'completed',
                completed_at = NOW(),
                pages_processed = $2,
                movies_processed = $3,
                error_message = COALESCE($4, error_message),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(batch.pages_processed)
        .bind(batch.movies_processed)
        .bind(batch.completion_note())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn fail_batch(&self, id: Uuid, message: &str) -> StoreResult<Batch> {
        let row: Option<BatchRow> = sqlx::query_as(
            r#"
            UPDATE movie_batches
            SET status = 'failed', completed_at = NOW(), error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(message)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_transition(id, BatchStatus::Failed).await),
        }
    }

    async fn insert_review(&self, new: NewReview) -> StoreResult<Review> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM movies WHERE id = $1)")
            .bind(new.movie_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(StoreError::movie_not_found(new.movie_id));
        }

        let review: Review = sqlx::query_as(
            r#"
            INSERT INTO reviews (id, movie_id, author, comment, rating)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, movie_id, author, comment, rating, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.movie_id)
        .bind(&new.author)
        .bind(&new.comment)
        .bind(new.rating)
        .fetch_one(&self.pool)
        .await?;

        Ok(review)
    }

    async fn list_reviews(&self, movie_id: Uuid) -> StoreResult<Vec<Review>> {
        let reviews: Vec<Review> = sqlx::query_as(
            r#"
            SELECT id, movie_id, author, comment, rating, created_at
            FROM reviews
            WHERE movie_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(movie_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews)
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let acquired: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ingest_leases (name, holder, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
            SET acquired_at = CASE
                    WHEN ingest_leases.holder = EXCLUDED.holder THEN ingest_leases.acquired_at
                    ELSE EXCLUDED.acquired_at
                END,
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE ingest_leases.expires_at <= NOW()
               OR ingest_leases.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.is_some())
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM ingest_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, search: &MovieSearch) {
    if let Some(query) = &search.query {
        let pattern = like_pattern(query);
        builder
            .push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(year) = search.year {
        builder.push(" AND year = ").push_bind(year);
    }
    if let Some(director) = &search.director {
        builder
            .push(" AND director ILIKE ")
            .push_bind(like_pattern(director));
    }
}

/// `%term%` with LIKE wildcards in `term` escaped
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
