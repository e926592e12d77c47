//! Ingestion configuration
//!
//! Provider credentials plus the knobs of the scheduled ingestion run, all
//! loaded from `TMDB_*` and `INGEST_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use cinedex_common::CinedexError;
use serde::{Deserialize, Serialize};

use super::worker::RetryPolicy;

/// Default TMDB API root.
pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Default response language for listing and detail requests.
pub const DEFAULT_TMDB_LANGUAGE: &str = "en-US";

/// Default HTTP timeout for provider requests in seconds.
pub const DEFAULT_TMDB_TIMEOUT_SECS: u64 = 120;

/// Default scheduler tick in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Default maximum number of movies fetched per run.
pub const DEFAULT_MAX_MOVIES: u32 = 3000;

/// Movies returned per listing page by the provider.
pub const DEFAULT_MOVIES_PER_PAGE: u32 = 20;

/// Default number of page work units in flight.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default attempts per page work unit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default wait before each retry, in seconds.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [30, 60, 120];

/// Default per-attempt timeout for a page work unit in seconds.
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 120;

/// Default lifetime of the run lease in seconds (15 minutes).
pub const DEFAULT_LEASE_TTL_SECS: u64 = 900;

/// Default provider calls allowed per window.
pub const DEFAULT_RATE_LIMIT: u32 = 40;

/// Default rate limit window in seconds.
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 10;

/// TMDB client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbConfig {
    /// v4 read access token sent as a bearer token
    #[serde(skip_serializing)]
    pub api_token: String,
    pub base_url: String,
    pub language: String,
    pub timeout_secs: u64,
}

impl TmdbConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_token: std::env::var("TMDB_API_TOKEN").unwrap_or_default(),
            base_url: std::env::var("TMDB_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_TMDB_BASE_URL.to_string()),
            language: std::env::var("TMDB_LANGUAGE")
                .unwrap_or_else(|_| DEFAULT_TMDB_LANGUAGE.to_string()),
            timeout_secs: env_or("TMDB_TIMEOUT_SECS", DEFAULT_TMDB_TIMEOUT_SECS)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_token.trim().is_empty() {
            anyhow::bail!("TMDB_API_TOKEN must be set");
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("TMDB base URL must start with http:// or https://");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("TMDB timeout must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            base_url: DEFAULT_TMDB_BASE_URL.to_string(),
            language: DEFAULT_TMDB_LANGUAGE.to_string(),
            timeout_secs: DEFAULT_TMDB_TIMEOUT_SECS,
        }
    }
}

/// Scheduled ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Whether `run` starts the scheduler
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_movies: u32,
    pub movies_per_page: u32,
    /// Overrides the page ceiling derived from `max_movies`
    pub max_pages: Option<u32>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_secs: Vec<u64>,
    pub unit_timeout_secs: u64,
    /// Failed pages tolerated before the batch is failed; `None` tolerates any
    pub max_failed_pages: Option<u32>,
    pub lease_ttl_secs: u64,
    pub rate_limit: u32,
    pub rate_window_secs: u64,
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_or("INGEST_ENABLED", defaults.enabled)?,
            interval_secs: env_or("INGEST_INTERVAL_SECS", defaults.interval_secs)?,
            max_movies: env_or("INGEST_MAX_MOVIES", defaults.max_movies)?,
            movies_per_page: env_or("INGEST_MOVIES_PER_PAGE", defaults.movies_per_page)?,
            max_pages: env_opt("INGEST_MAX_PAGES")?,
            concurrency: env_or("INGEST_CONCURRENCY", defaults.concurrency)?,
            max_retries: env_or("INGEST_MAX_RETRIES", defaults.max_retries)?,
            backoff_secs: match std::env::var("INGEST_BACKOFF_SECS") {
                Ok(raw) if !raw.trim().is_empty() => parse_backoff(&raw)?,
                _ => defaults.backoff_secs,
            },
            unit_timeout_secs: env_or("INGEST_UNIT_TIMEOUT_SECS", defaults.unit_timeout_secs)?,
            max_failed_pages: env_opt("INGEST_MAX_FAILED_PAGES")?,
            lease_ttl_secs: env_or("INGEST_LEASE_TTL_SECS", defaults.lease_ttl_secs)?,
            rate_limit: env_or("INGEST_RATE_LIMIT", defaults.rate_limit)?,
            rate_window_secs: env_or("INGEST_RATE_WINDOW_SECS", defaults.rate_window_secs)?,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_secs == 0 {
            anyhow::bail!("Ingest interval must be greater than 0");
        }
        if self.movies_per_page == 0 {
            anyhow::bail!("Movies per page must be greater than 0");
        }
        if self.concurrency == 0 {
            anyhow::bail!("Ingest concurrency must be greater than 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("Ingest max_retries must be at least 1");
        }
        if self.unit_timeout_secs == 0 {
            anyhow::bail!("Ingest unit timeout must be greater than 0");
        }
        if self.rate_limit == 0 {
            anyhow::bail!("Ingest rate limit must be greater than 0");
        }
        if self.rate_window_secs == 0 {
            anyhow::bail!("Ingest rate window must be greater than 0");
        }
        // The lease is renewed as units finish, so it must outlive the slowest unit
        let max_unit = self.max_unit_duration();
        if self.lease_ttl() < max_unit {
            anyhow::bail!(
                "Ingest lease TTL ({}s) must cover the longest page work unit ({}s)",
                self.lease_ttl_secs,
                max_unit.as_secs()
            );
        }
        Ok(())
    }

    /// Upper bound on pages fetched in one run
    pub fn page_ceiling(&self) -> u32 {
        self.max_pages
            .unwrap_or_else(|| self.max_movies.div_ceil(self.movies_per_page.max(1)))
    }

    /// Longest one work unit can run: every attempt timing out, plus backoff
    pub fn max_unit_duration(&self) -> Duration {
        let policy = self.retry_policy();
        let attempts = policy.max_attempts.max(1);
        let backoff: Duration = (1..attempts).map(|n| policy.delay_before_retry(n)).sum();
        policy.attempt_timeout * attempts + backoff
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff: self
                .backoff_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            attempt_timeout: Duration::from_secs(self.unit_timeout_secs),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_INTERVAL_SECS,
            max_movies: DEFAULT_MAX_MOVIES,
            movies_per_page: DEFAULT_MOVIES_PER_PAGE,
            max_pages: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT_SECS,
            max_failed_pages: None,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window_secs: DEFAULT_RATE_WINDOW_SECS,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    Ok(env_opt(key)?.unwrap_or(default))
}

fn env_opt<T: FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::Error::from(CinedexError::invalid_env(key, &raw))),
        _ => Ok(None),
    }
}

/// Parse a comma separated list of seconds, e.g. `30,60,120`
fn parse_backoff(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse()
                .map_err(|_| anyhow::Error::from(CinedexError::invalid_env("INGEST_BACKOFF_SECS", raw)))
        })
        .collect()
}
