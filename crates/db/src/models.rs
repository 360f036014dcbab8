//! Database models and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A municipality as registered on first encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Municipality {
    pub id: i64,
    pub code: i64,
    pub name: String,
    pub state: String,
    pub region: String,
}

/// Municipality attributes read from the source dataset.
#[derive(Debug, Clone, Copy)]
pub struct NewMunicipality<'a> {
    pub code: i64,
    pub name: &'a str,
    pub state: &'a str,
    pub region: &'a str,
}

/// Observed dropout rates for one municipality and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HistoricalRecord {
    pub municipality_id: i64,
    pub year: i64,
    pub total: f64,
    pub grade_1: Option<f64>,
    pub grade_2: Option<f64>,
    pub grade_3: Option<f64>,
    pub grade_4: Option<f64>,
    pub non_graded: Option<f64>,
}

/// Forecast dropout rate for one municipality and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ForecastRecord {
    pub municipality_id: i64,
    pub year: i64,
    pub estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Whether accuracy metrics were computed against a real or an imputed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MetricQuality {
    /// The validation year was present in the source data.
    Observed,
    /// The validation year was missing and the last known value stood in.
    Imputed,
}

/// Accuracy of the latest model of one municipality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AccuracyMetricsRecord {
    pub municipality_id: i64,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub quality: MetricQuality,
    pub computed_at: DateTime<Utc>,
}

/// Historical row joined with its municipality, as listed by the API.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct HistoricalView {
    pub municipality: String,
    pub municipality_code: i64,
    pub year: i64,
    pub total: f64,
    pub grade_1: Option<f64>,
    pub grade_2: Option<f64>,
    pub grade_3: Option<f64>,
    pub grade_4: Option<f64>,
    pub non_graded: Option<f64>,
}

/// Forecast row joined with its municipality, as listed by the API.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct ForecastView {
    pub municipality: String,
    pub municipality_code: i64,
    pub year: i64,
    pub estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Metrics row joined with its municipality, as listed by the API.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct MetricsView {
    pub municipality: String,
    pub municipality_code: i64,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub quality: MetricQuality,
    pub computed_at: DateTime<Utc>,
}
