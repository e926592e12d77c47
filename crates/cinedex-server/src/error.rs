//! Error types for the catalog and the ingestion pipeline

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::BatchStatus;

/// Errors raised by a [`crate::db::CatalogStore`] implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Batch {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    },
}

impl StoreError {
    pub fn batch_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Batch",
            id: id.to_string(),
        }
    }

    pub fn movie_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Movie",
            id: id.to_string(),
        }
    }
}

/// Errors returned by a [`crate::ingest::MovieProvider`]
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors returned while upserting a single movie
#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("Malformed movie record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that abort a single page work unit attempt
#[derive(Debug, Error)]
pub enum WorkUnitError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Page {page} timed out after {}s", .timeout.as_secs())]
    Timeout { page: u32, timeout: Duration },
}

/// Errors that abort an ingestion run as a whole
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Discovery request failed: {0}")]
    Discovery(#[source] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Ingestion lease '{0}' is held by another run")]
    LeaseHeld(String),
}

/// A single rejected input field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors surfaced by the catalog read side
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl CatalogError {
    /// HTTP status code the surrounding API should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::Validation(_) => 422,
            CatalogError::NotFound(_) => 404,
            CatalogError::Store(_) => 500,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::Validation(_) => "VALIDATION_ERROR",
            CatalogError::NotFound(_) => "NOT_FOUND",
            CatalogError::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => CatalogError::NotFound(format!("{entity} {id}")),
            other => CatalogError::Store(other),
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
