//! Error types shared across Cinedex crates

use thiserror::Error;

/// Result type alias for Cinedex operations
pub type Result<T> = std::result::Result<T, CinedexError>;

/// Main error type for Cinedex
#[derive(Error, Debug)]
pub enum CinedexError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CinedexError {
    /// Build a configuration error for an environment variable that failed to parse
    pub fn invalid_env(key: &str, value: &str) -> Self {
        CinedexError::Config(format!("{} has an invalid value: '{}'", key, value))
    }
}
