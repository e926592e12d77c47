//! Review submission rules

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CatalogError, FieldError};
use crate::models::{NewReview, MAX_RATING, MIN_RATING};

pub const MAX_AUTHOR_LENGTH: usize = 255;

/// Review as submitted by a client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewInput {
    pub author: String,
    pub comment: String,
    pub rating: i16,
}

impl ReviewInput {
    pub fn validate(self, movie_id: Uuid) -> Result<NewReview, CatalogError> {
        let mut errors = Vec::new();

        let author = self.author.trim().to_string();
        if author.is_empty() {
            errors.push(FieldError::new("author", "is required"));
        } else if author.chars().count() > MAX_AUTHOR_LENGTH {
            errors.push(FieldError::new(
                "author",
                format!("must be at most {MAX_AUTHOR_LENGTH} characters"),
            ));
        }

        let comment = self.comment.trim().to_string();
        if comment.is_empty() {
            errors.push(FieldError::new("comment", "is required"));
        }

        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            errors.push(FieldError::new(
                "rating",
                format!("must be between {MIN_RATING} and {MAX_RATING}"),
            ));
        }

        if !errors.is_empty() {
            return Err(CatalogError::Validation(errors));
        }

        Ok(NewReview {
            movie_id,
            author,
            comment,
            rating: self.rating,
        })
    }
}
