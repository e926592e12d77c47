//! Shared helpers for cinedex-server integration tests
//!
//! - [`StubProvider`]: scripted [`MovieProvider`] for driver tests
//! - [`TestPostgres`]: PostgreSQL container with migrations applied
//! - [`init_test_tracing`]: test-writer subscriber

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

use cinedex_server::error::ProviderError;
use cinedex_server::ingest::{
    Credits, CrewMember, IngestConfig, MovieDetails, MoviePage, MovieProvider, RawMovie,
};

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,cinedex_server=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// Ingestion config with short backoff, suitable for paused-time tests
pub fn test_ingest_config() -> IngestConfig {
    IngestConfig {
        backoff_secs: vec![1],
        ..Default::default()
    }
}

/// A listing record with the given id, `Movie <id>` title and a 2020 release
pub fn raw_movie(id: i64) -> RawMovie {
    RawMovie {
        id: Some(id),
        title: Some(format!("Movie {id}")),
        overview: Some(format!("Overview {id}")),
        release_date: Some("2020-05-01".to_string()),
        extra: Default::default(),
    }
}

pub fn details_with_director(id: i64, director: &str) -> MovieDetails {
    MovieDetails {
        id: Some(id),
        credits: Some(Credits {
            crew: vec![CrewMember {
                job: Some("Director".to_string()),
                name: Some(director.to_string()),
            }],
        }),
    }
}

#[derive(Default)]
struct Script {
    reported_pages: u32,
    pages: HashMap<u32, Vec<RawMovie>>,
    /// Remaining failures per page; `u32::MAX` fails forever
    failures: HashMap<u32, u32>,
    details: HashMap<i64, MovieDetails>,
    /// Page requests, in order
    page_calls: Vec<u32>,
}

/// Scripted provider: listing pages, per-page failures and detail records
#[derive(Default)]
pub struct StubProvider {
    script: Mutex<Script>,
    detail_calls: AtomicUsize,
}

impl StubProvider {
    /// Provider reporting `reported_pages` pages, `per_page` movies each
    ///
    /// Movie ids are `page * 1000 + index`.
    pub fn with_pages(reported_pages: u32, per_page: usize) -> Self {
        let stub = Self::default();
        {
            let mut script = stub.lock();
            script.reported_pages = reported_pages;
            for page in 1..=reported_pages {
                let movies = (0..per_page)
                    .map(|i| raw_movie(i64::from(page) * 1000 + i as i64))
                    .collect();
                script.pages.insert(page, movies);
            }
        }
        stub
    }

    pub fn set_page(&self, page: u32, movies: Vec<RawMovie>) {
        self.lock().pages.insert(page, movies);
    }

    /// Fail the next `times` requests for `page`
    pub fn fail_page(&self, page: u32, times: u32) {
        self.lock().failures.insert(page, times);
    }

    pub fn fail_page_always(&self, page: u32) {
        self.fail_page(page, u32::MAX);
    }

    pub fn set_details(&self, details: MovieDetails) {
        if let Some(id) = details.id {
            self.lock().details.insert(id, details);
        }
    }

    pub fn clear_details(&self) {
        self.lock().details.clear();
    }

    pub fn page_calls(&self) -> Vec<u32> {
        self.lock().page_calls.clone()
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MovieProvider for StubProvider {
    fn source_name(&self) -> &str {
        "STUB"
    }

    fn listing_endpoint(&self) -> String {
        "stub://movie/popular".to_string()
    }

    async fn fetch_page(&self, page: u32) -> Result<MoviePage, ProviderError> {
        let mut script = self.lock();
        script.page_calls.push(page);

        if let Some(remaining) = script.failures.get_mut(&page) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(ProviderError::Status {
                    status: 503,
                    body: format!("page {page} unavailable"),
                });
            }
        }

        let results = script.pages.get(&page).cloned().unwrap_or_default();
        Ok(MoviePage {
            page,
            total_results: script.reported_pages * results.len() as u32,
            results,
            total_pages: script.reported_pages,
        })
    }

    async fn fetch_details(&self, movie_id: i64) -> Option<MovieDetails> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().details.get(&movie_id).cloned()
    }
}

/// PostgreSQL container with a connected pool and migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!(
                "postgresql://postgres:postgres@{}:{}/postgres",
                host, port
            ))
            .await
            .context("Failed to connect to PostgreSQL")?;

        cinedex_server::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
