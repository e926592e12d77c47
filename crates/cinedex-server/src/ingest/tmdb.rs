//! TMDB implementation of [`MovieProvider`]

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use tracing::{debug, error, warn};

use super::config::TmdbConfig;
use super::provider::{MovieDetails, MovieProvider, MoviePage};
use crate::error::ProviderError;

pub const SOURCE_NAME: &str = "TMDB";
const POPULAR_PATH: &str = "/movie/popular";

/// HTTP client for the TMDB v3 API
#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_token: String,
    language: String,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            language: config.language.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl MovieProvider for TmdbClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn listing_endpoint(&self) -> String {
        self.url(POPULAR_PATH)
    }

    async fn fetch_page(&self, page: u32) -> Result<MoviePage, ProviderError> {
        debug!(page, "Fetching TMDB listing page");

        let response = self
            .client
            .get(self.url(POPULAR_PATH))
            .bearer_auth(&self.api_token)
            .query(&[("page", page.to_string()), ("language", self.language.clone())])
            .send()
            .await
            .inspect_err(|e| error!(page, error = %e, "TMDB listing request failed"))?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!(
                page,
                status = status.as_u16(),
                body = %body,
                "TMDB listing request returned an error status"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(page, error = %e, "TMDB listing response could not be decoded");
            ProviderError::Decode(e)
        })
    }

    async fn fetch_details(&self, movie_id: i64) -> Option<MovieDetails> {
        let result = self
            .client
            .get(self.url(&format!("/movie/{movie_id}")))
            .bearer_auth(&self.api_token)
            .query(&[
                ("append_to_response", "credits"),
                ("language", self.language.as_str()),
            ])
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(movie_id, status = response.status().as_u16(), "TMDB details unavailable");
                return None;
            }
            Err(e) => {
                warn!(movie_id, error = %e, "TMDB details request failed");
                return None;
            }
        };

        match response.json::<MovieDetails>().await {
            Ok(details) => Some(details),
            Err(e) => {
                warn!(movie_id, error = %e, "TMDB details response could not be decoded");
                None
            }
        }
    }
}
