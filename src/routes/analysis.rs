use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{cors, current_snapshot};
use crate::{
    error::AppError,
    models::{ColumnMap, ColumnProfile, ColumnStatistics, DataQualityReport, RowRecord},
    services::{
        analysis::{
            anomaly::detect_anomalies,
            charts::{recommended_charts, shape_chart, ChartSpec},
            comparison::compare_segments,
            correlation::{correlate, correlation_matrix},
            filters::{filter_analysis, FilterRule},
            profiler::{build_snapshot, mean_extremes},
            scenario::{generate_scenarios, Adjustment, AdjustmentKind},
        },
        export::{export, ExportFormat},
        ingest::parse_upload,
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/analysis", get(get_analysis).delete(clear_analysis))
        .route("/analysis/statistics", get(get_statistics))
        .route("/analysis/profile", get(get_profile))
        .route("/analysis/quality", get(get_quality))
        .route("/analysis/summary", get(get_summary))
        .route("/analysis/anomalies", get(get_anomalies))
        .route("/analysis/correlation", get(get_correlation))
        .route("/analysis/correlation/matrix", get(get_correlation_matrix))
        .route("/analysis/comparison", get(get_comparison))
        .route("/analysis/chart", post(post_chart))
        .route("/analysis/charts/recommended", post(post_recommended_charts))
        .route("/analysis/scenarios", get(get_scenarios))
        .route("/analysis/filter", post(post_filter))
        .route("/analysis/export", get(get_export))
        .layer(cors())
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    version: u64,
    created_at: DateTime<Utc>,
    row_count: usize,
    column_count: usize,
    headers: Vec<String>,
    quality: DataQualityReport,
}

#[axum::debug_handler]
async fn upload(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let start = std::time::Instant::now();
    tracing::info!("Received upload, size: {}KB", body.len() / 1024);

    // Parsing, profiling and persisting the snapshot all block.
    let store = state.store.clone();
    let stored = tokio::task::spawn_blocking(move || {
        let snapshot = build_snapshot(parse_upload(body)?);
        store
            .set(Some(snapshot))
            .ok_or_else(|| AppError::Internal("Snapshot was not stored".to_string()))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Upload task failed: {}", e)))??;

    tracing::info!("Snapshot v{} ready in {:?}", stored.version, start.elapsed());

    Ok(Json(UploadResponse {
        version: stored.version,
        created_at: stored.created_at,
        row_count: stored.table.len(),
        column_count: stored.headers.len(),
        headers: stored.headers.clone(),
        quality: stored.quality.clone(),
    }))
}

async fn get_analysis(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    Ok(Json(&*snapshot).into_response())
}

async fn clear_analysis(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.clear())
        .await
        .map_err(|e| AppError::Internal(format!("Clear task failed: {}", e)))?;
    tracing::info!("Analysis cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_statistics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    Ok(Json(&snapshot.statistics).into_response())
}

async fn get_profile(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    Ok(Json(&snapshot.profile).into_response())
}

async fn get_quality(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    Ok(Json(&snapshot.quality).into_response())
}

async fn get_summary(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let extremes = state
        .memos
        .mean_extremes
        .get_or_compute(snapshot.version, (), || Ok(mean_extremes(&snapshot.statistics)))?;
    Ok(Json(&*extremes).into_response())
}

async fn get_anomalies(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let anomalies = state.memos.anomalies.get_or_compute(snapshot.version, (), || {
        Ok(detect_anomalies(&snapshot.table, &snapshot.statistics, &state.config.anomaly))
    })?;
    Ok(Json(&*anomalies).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CorrelationParams {
    x: String,
    y: String,
}

async fn get_correlation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CorrelationParams>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let key = (params.x.clone(), params.y.clone());
    let correlation = state.memos.correlations.get_or_compute(snapshot.version, key, || {
        correlate(&snapshot.table, &params.x, &params.y)
    })?;
    Ok(Json(&*correlation).into_response())
}

async fn get_correlation_matrix(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let matrix = state.memos.correlation_matrix.get_or_compute(snapshot.version, (), || {
        Ok(correlation_matrix(&snapshot.table, &snapshot.statistics))
    })?;
    Ok(Json(&*matrix).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ComparisonParams {
    segment: String,
    metric: String,
}

async fn get_comparison(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ComparisonParams>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let key = (params.segment.clone(), params.metric.clone());
    let groups = state.memos.comparisons.get_or_compute(snapshot.version, key, || {
        compare_segments(&snapshot.table, &params.segment, &params.metric)
    })?;
    Ok(Json(&*groups).into_response())
}

async fn post_chart(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<ChartSpec>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let key = (spec.columns.clone(), spec.chart_type.to_ascii_lowercase());
    let series = state.memos.charts.get_or_compute(snapshot.version, key, || {
        Ok(shape_chart(&snapshot.table, &spec, &state.config.charts))
    })?;
    Ok(Json(&*series).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RecommendedChartsRequest {
    #[serde(default)]
    visualizations: Vec<ChartSpec>,
}

async fn post_recommended_charts(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecommendedChartsRequest>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let charts = recommended_charts(&snapshot.table, &request.visualizations, &state.config.charts);
    Ok(Json(charts).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ScenarioParams {
    column: String,
    #[serde(default = "default_adjustment")]
    adjustment: AdjustmentKind,
    magnitude: f64,
}

fn default_adjustment() -> AdjustmentKind {
    AdjustmentKind::Percentage
}

async fn get_scenarios(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScenarioParams>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let adjustment = Adjustment {
        kind: params.adjustment,
        magnitude: params.magnitude,
    };
    let kind = match params.adjustment {
        AdjustmentKind::Percentage => "percentage",
        AdjustmentKind::Fixed => "fixed",
    };
    let key = (params.column.clone(), kind.to_string(), params.magnitude.to_bits());
    let records = state.memos.scenarios.get_or_compute(snapshot.version, key, || {
        generate_scenarios(&snapshot.table, &params.column, adjustment)
    })?;
    Ok(Json(&*records).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    #[serde(default)]
    rules: Vec<FilterRule>,
}

#[derive(Serialize)]
pub struct FilterResponse<'a> {
    row_count: usize,
    rows: Vec<RowRecord<'a>>,
    statistics: &'a ColumnMap<ColumnStatistics>,
    profile: &'a ColumnMap<ColumnProfile>,
}

async fn post_filter(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FilterRequest>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let filtered = filter_analysis(&snapshot.table, &request.rules)?;
    let response = FilterResponse {
        row_count: filtered.table.len(),
        rows: filtered.table.records().collect(),
        statistics: &filtered.statistics,
        profile: &filtered.profile,
    };
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    format: ExportFormat,
}

async fn get_export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError> {
    let snapshot = current_snapshot(&state)?;
    let body = export(&snapshot.table, params.format)?;
    let disposition = format!("attachment; filename=\"{}\"", params.format.file_name());

    Ok((
        [
            (header::CONTENT_TYPE, params.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
