//! Movie reviews

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub author: String,
    pub comment: String,
    pub rating: i16,
    pub created_at: DateTime<Utc>,
}

/// A review as submitted, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub movie_id: Uuid,
    pub author: String,
    pub comment: String,
    pub rating: i16,
}
