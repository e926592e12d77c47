//! Movie provider seam and its wire types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One movie as returned by a listing page
///
/// The known fields are typed and optional; everything else the provider
/// sends is kept in `extra` so the complete payload can be audited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMovie {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawMovie {
    /// Full payload as JSON, as stored in the fetch log
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A listing page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoviePage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub results: Vec<RawMovie>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub job: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

/// Detail record, requested with credits appended
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: Option<i64>,
    pub credits: Option<Credits>,
}

impl MovieDetails {
    /// Name of the first crew member credited as director
    pub fn director(&self) -> Option<String> {
        self.credits
            .as_ref()?
            .crew
            .iter()
            .filter(|member| member.job.as_deref() == Some("Director"))
            .find_map(|member| member.name.clone())
    }
}

/// Source of movie listings and details
#[async_trait]
pub trait MovieProvider: Send + Sync {
    /// Short name recorded on batches, e.g. `TMDB`
    fn source_name(&self) -> &str;

    /// Listing endpoint recorded on batches
    fn listing_endpoint(&self) -> String;

    /// Fetch one listing page (1-indexed)
    async fn fetch_page(&self, page: u32) -> Result<MoviePage, ProviderError>;

    /// Fetch details for a movie; `None` when they cannot be retrieved
    async fn fetch_details(&self, movie_id: i64) -> Option<MovieDetails>;
}
