//! Request and response shapes of the JSON API.

use dropout_db::queries::{ListQuery, Page, SortKey, SortOrder, View, MAX_PER_PAGE};
use serde::{Deserialize, Serialize};

/// Query string of the list endpoints.
///
/// Every field is kept as raw text: a value that does not parse is ignored
/// instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    /// Case-insensitive substring of the municipality name.
    pub municipality: Option<String>,
    pub year: Option<String>,
    pub sort: Option<String>,
    /// `asc` (default) or `desc`; only applies together with `sort`.
    pub order: Option<String>,
    /// Page number (1-indexed). Defaults to 1.
    pub page: Option<String>,
    /// Items per page. Defaults to and is capped at 10 000.
    pub per_page: Option<String>,
}

impl ListParams {
    /// Turn the raw parameters into a query for `view`.
    pub fn to_query(&self, view: View) -> ListQuery {
        let order = self
            .order
            .as_deref()
            .map(SortOrder::parse)
            .unwrap_or_default();

        ListQuery {
            name_contains: self
                .municipality
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            year: parse_number(&self.year),
            sort: self
                .sort
                .as_deref()
                .and_then(|key| SortKey::for_view(view, key.trim()))
                .map(|key| (key, order)),
            page: parse_number(&self.page).unwrap_or(1),
            per_page: parse_number(&self.per_page).unwrap_or(MAX_PER_PAGE),
        }
    }
}

fn parse_number<T: std::str::FromStr>(raw: &Option<String>) -> Option<T> {
    raw.as_deref().and_then(|value| value.trim().parse().ok())
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// A page of items with its pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> From<Page<T>> for ListResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            pagination: PaginationMeta {
                page: page.page,
                per_page: page.per_page,
                total: page.total,
                total_pages: page.total_pages,
            },
            data: page.items,
        }
    }
}

/// Inclusive range of years.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct YearSpan {
    pub first: i64,
    pub last: i64,
}

/// Dataset overview shown above the listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryResponse {
    pub total_municipalities: i64,
    /// Years the models were trained on, when any history is stored.
    pub training_period: Option<YearSpan>,
    pub validation_year: i64,
    /// Years covered by the stored forecasts, when any are stored.
    pub forecast_years: Option<YearSpan>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}
