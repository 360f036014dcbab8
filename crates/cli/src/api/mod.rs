//! Read-only JSON API over the stored dropout data.
//!
//! List endpoints are mounted under `/api/v1`; `/health` and `/metrics`
//! sit at the root.

pub mod dto;
pub mod error;
pub mod handlers;

use axum::Router;
use dropout_db::DbPool;
use dropout_telemetry::Metrics;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub metrics: Metrics,
    /// Cutoff year the stored forecasts were produced with.
    pub cutoff_year: i64,
}

/// Build the complete router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system_routes())
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve the API until the process is stopped.
///
/// # Arguments
/// * `bind_address` - Address to listen on (e.g., "127.0.0.1:8080")
/// * `state` - Handler state
pub async fn serve(bind_address: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("API listening on http://{}", bind_address);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
