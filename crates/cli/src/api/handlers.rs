//! Route handlers.

use super::dto::{HealthResponse, ListParams, ListResponse, SummaryResponse, YearSpan};
use super::error::ApiError;
use super::AppState;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use dropout_db::models::{ForecastView, HistoricalView, MetricsView};
use dropout_db::queries::{self, View};

/// Routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/historical", get(list_historical))
        .route("/forecasts", get(list_forecasts))
        .route("/metrics", get(list_metrics))
        .route("/summary", get(summary))
}

/// Unversioned operational routes.
pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}

/// `GET /api/v1/historical`
async fn list_historical(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<HistoricalView>>, ApiError> {
    state.metrics.inc_api_request("historical");
    let page = queries::list_historical(state.db.pool(), &params.to_query(View::Historical)).await?;
    Ok(Json(page.into()))
}

/// `GET /api/v1/forecasts`
async fn list_forecasts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<ForecastView>>, ApiError> {
    state.metrics.inc_api_request("forecasts");
    let page = queries::list_forecasts(state.db.pool(), &params.to_query(View::Forecasts)).await?;
    Ok(Json(page.into()))
}

/// `GET /api/v1/metrics`
async fn list_metrics(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<MetricsView>>, ApiError> {
    state.metrics.inc_api_request("metrics");
    let page = queries::list_metrics(state.db.pool(), &params.to_query(View::Metrics)).await?;
    Ok(Json(page.into()))
}

/// `GET /api/v1/summary`
async fn summary(State(state): State<AppState>) -> Result<Json<SummaryResponse>, ApiError> {
    state.metrics.inc_api_request("summary");
    let total_municipalities = queries::count_municipalities(state.db.pool()).await?;
    let forecast_years = queries::forecast_year_range(state.db.pool())
        .await?
        .map(|(first, last)| YearSpan { first, last });
    let training_period = queries::historical_year_range(state.db.pool())
        .await?
        .map(|(first, last)| YearSpan {
            first,
            last: last.min(state.cutoff_year - 1),
        })
        .filter(|span| span.first <= span.last);

    Ok(Json(SummaryResponse {
        total_municipalities,
        training_period,
        validation_year: state.cutoff_year,
        forecast_years,
    }))
}

/// `GET /health`
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// `GET /metrics` in the Prometheus text format.
async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .gather()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
