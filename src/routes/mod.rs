use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{error::AppError, models::AnalysisSnapshot, AppState};

pub mod analysis;
pub mod insights;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .merge(analysis::routes())
        .merge(insights::routes())
}

async fn health_check() -> &'static str {
    "OK"
}

pub(crate) fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600))
}

/// The snapshot every analysis endpoint works from.
pub(crate) fn current_snapshot(state: &AppState) -> Result<Arc<AnalysisSnapshot>, AppError> {
    state
        .store
        .get()
        .ok_or_else(|| AppError::NotFound("No analysis loaded".to_string()))
}
