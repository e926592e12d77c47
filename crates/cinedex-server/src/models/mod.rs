//! Catalog domain models

pub mod batch;
pub mod movie;
pub mod review;

pub use batch::{failed_pages_note, Batch, BatchProgress, BatchStatus, NewBatch};
pub use movie::{
    CreditsLookup, FetchLog, FetchLogEntry, FetchStatus, Movie, MovieUpsert, FETCH_LOG_CAPACITY,
};
pub use review::{NewReview, Review, MAX_RATING, MIN_RATING};
