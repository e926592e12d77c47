//! Movie search filters
//!
//! [`SearchParams`] is the raw query-string shape; [`MovieSearch`] is the
//! validated form the stores execute.
//!
//! # Examples
//!
//! ```rust,ignore
//! let params = SearchParams {
//!     query: Some("matrix".to_string()),
//!     sort_by: Some("year".to_string()),
//!     ..Default::default()
//! };
//! let search = MovieSearch::try_from(params)?;
//! let page = store.search_movies(&search).await?;
//! ```

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, FieldError};

pub const MIN_QUERY_LENGTH: usize = 2;
pub const MIN_YEAR: i32 = 1900;
/// Years accepted past the current one
pub const YEAR_HORIZON: i32 = 10;
pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 50;

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Title,
    Year,
    #[default]
    CreatedAt,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::Year => "year",
            SortField::CreatedAt => "created_at",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "title" => Some(SortField::Title),
            "year" => Some(SortField::Year),
            "created_at" => Some(SortField::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Unvalidated search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub year: Option<i32>,
    pub director: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Validated search filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSearch {
    /// Substring matched against title or description
    pub query: Option<String>,
    pub year: Option<i32>,
    /// Substring matched against director
    pub director: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
    /// 1-indexed
    pub page: u32,
    pub per_page: u32,
}

impl Default for MovieSearch {
    fn default() -> Self {
        Self {
            query: None,
            year: None,
            director: None,
            sort_by: SortField::default(),
            order: SortOrder::default(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl MovieSearch {
    /// Validate raw parameters against a given current year
    pub fn validate(params: SearchParams, current_year: i32) -> Result<Self, CatalogError> {
        let mut errors = Vec::new();

        let query = non_blank(params.query);
        if let Some(q) = &query {
            if q.chars().count() < MIN_QUERY_LENGTH {
                errors.push(FieldError::new(
                    "query",
                    format!("must be at least {MIN_QUERY_LENGTH} characters"),
                ));
            }
        }

        let max_year = current_year + YEAR_HORIZON;
        if let Some(year) = params.year {
            if !(MIN_YEAR..=max_year).contains(&year) {
                errors.push(FieldError::new(
                    "year",
                    format!("must be between {MIN_YEAR} and {max_year}"),
                ));
            }
        }

        let sort_by = match non_blank(params.sort_by) {
            None => SortField::default(),
            Some(value) => SortField::parse(&value).unwrap_or_else(|| {
                errors.push(FieldError::new(
                    "sort_by",
                    "must be one of title, year, created_at",
                ));
                SortField::default()
            }),
        };

        let order = match non_blank(params.order) {
            None => SortOrder::default(),
            Some(value) => SortOrder::parse(&value).unwrap_or_else(|| {
                errors.push(FieldError::new("order", "must be one of asc, desc"));
                SortOrder::default()
            }),
        };

        let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            errors.push(FieldError::new(
                "per_page",
                format!("must be between 1 and {MAX_PER_PAGE}"),
            ));
        }

        let page = params.page.unwrap_or(1);
        if page == 0 {
            errors.push(FieldError::new("page", "must be greater than 0"));
        }

        if !errors.is_empty() {
            return Err(CatalogError::Validation(errors));
        }

        Ok(Self {
            query,
            year: params.year,
            director: non_blank(params.director),
            sort_by,
            order,
            page,
            per_page,
        })
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

impl TryFrom<SearchParams> for MovieSearch {
    type Error = CatalogError;

    fn try_from(params: SearchParams) -> Result<Self, Self::Error> {
        Self::validate(params, Utc::now().year())
    }
}

/// One page of results plus totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn total_pages(&self) -> i64 {
        if self.per_page == 0 {
            return 0;
        }
        let per_page = i64::from(self.per_page);
        (self.total + per_page - 1) / per_page
    }

    pub fn has_next(&self) -> bool {
        i64::from(self.page) < self.total_pages()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
