use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{cors, current_snapshot};
use crate::{
    error::AppError,
    services::{
        analysis::charts::{recommended_charts, RecommendedChart},
        insights::Recommendations,
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/insights/recommendations", post(post_recommendations))
        .route("/insights/narrative", post(post_narrative))
        .route("/insights/scenario", post(post_scenario))
        .layer(cors())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationsResponse {
    recommendations: Recommendations,
    focus_columns: Vec<String>,
    charts: Vec<RecommendedChart>,
    generated_at: DateTime<Utc>,
}

#[axum::debug_handler]
async fn post_recommendations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecommendationsResponse>, AppError> {
    let start = std::time::Instant::now();
    let snapshot = current_snapshot(&state)?;
    tracing::info!("Requesting recommendations for snapshot v{}", snapshot.version);

    let recommendations = state.insights.recommendations(&snapshot).await?;
    let charts = recommended_charts(&snapshot.table, &recommendations.visualizations, &state.config.charts);
    let focus_columns = recommendations.focus_columns(&snapshot.statistics);

    tracing::info!(
        "Recommendations ready in {:?}: {} chart(s) shaped",
        start.elapsed(),
        charts.len()
    );

    Ok(Json(RecommendationsResponse {
        recommendations: (*recommendations).clone(),
        focus_columns,
        charts,
        generated_at: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeResponse {
    insights: String,
    generated_at: DateTime<Utc>,
}

async fn post_narrative(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NarrativeResponse>, AppError> {
    let snapshot = current_snapshot(&state)?;
    let insights = state.insights.narrative(&snapshot).await?;

    Ok(Json(NarrativeResponse {
        insights: insights.to_string(),
        generated_at: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScenarioQuestion {
    question: String,
}

#[derive(Debug, Serialize)]
pub struct ScenarioAnswer {
    analysis: String,
}

async fn post_scenario(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScenarioQuestion>,
) -> Result<Json<ScenarioAnswer>, AppError> {
    let snapshot = current_snapshot(&state)?;
    let analysis = state.insights.scenario(&snapshot, &request.question).await?;

    Ok(Json(ScenarioAnswer {
        analysis: analysis.to_string(),
    }))
}
