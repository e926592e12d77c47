//! Catalog read side
//!
//! Validated search, movie lookup and review storage. These are the
//! functions an HTTP layer calls into; routing itself lives elsewhere.

pub mod reviews;
pub mod search;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::CatalogStore;
use crate::error::CatalogError;
use crate::models::{Movie, Review};

pub use reviews::ReviewInput;
pub use search::{MovieSearch, Paginated, SearchParams, SortField, SortOrder};

/// Public representation of a movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieResource {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub director: Option<String>,
    pub year: Option<i32>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Movie> for MovieResource {
    fn from(movie: &Movie) -> Self {
        Self {
            id: movie.id,
            external_id: movie.external_id.clone(),
            title: movie.title.clone(),
            description: movie.description.clone(),
            director: movie.director.clone(),
            year: movie.year,
            last_fetched: movie.last_fetched(),
            created_at: movie.created_at,
            updated_at: movie.updated_at,
        }
    }
}

/// Query and review operations over a [`CatalogStore`]
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn search(
        &self,
        params: SearchParams,
    ) -> Result<Paginated<MovieResource>, CatalogError> {
        let search = MovieSearch::try_from(params)?;
        let page = self.store.search_movies(&search).await?;

        Ok(Paginated {
            items: page.items.iter().map(MovieResource::from).collect(),
            page: page.page,
            per_page: page.per_page,
            total: page.total,
        })
    }

    pub async fn get_movie(&self, id: Uuid) -> Result<MovieResource, CatalogError> {
        self.find(id).await.map(|movie| MovieResource::from(&movie))
    }

    pub async fn add_review(
        &self,
        movie_id: Uuid,
        input: ReviewInput,
    ) -> Result<Review, CatalogError> {
        let new = input.validate(movie_id)?;
        let review = self.store.insert_review(new).await?;
        info!(movie_id = %movie_id, review_id = %review.id, rating = review.rating, "Review stored");
        Ok(review)
    }

    pub async fn reviews(&self, movie_id: Uuid) -> Result<Vec<Review>, CatalogError> {
        self.find(movie_id).await?;
        Ok(self.store.list_reviews(movie_id).await?)
    }

    async fn find(&self, id: Uuid) -> Result<Movie, CatalogError> {
        self.store
            .find_movie(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Movie {id}")))
    }
}
