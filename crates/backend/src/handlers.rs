//! HTTP handlers for the trigger endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::mail::processor::EmailProcessor;
use crate::normalize;
use crate::reports::{pipeline, ReportError, ReportService};
use crate::sync::{SyncEngine, SyncError};

pub struct AppState {
    pub processor: Arc<EmailProcessor>,
    pub sync: Arc<SyncEngine>,
    pub reports: Arc<ReportService>,
    pub arrival_days_ahead: i64,
    pub birthday_days_ahead: i64,
}

pub type SharedState = Arc<AppState>;

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": env!("CARGO_PKG_NAME"),
        "status": "running",
    }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /process-emails — run one processing cycle over the mailbox.
pub async fn process_emails(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let summary = state
        .processor
        .process_incoming()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("processing failed: {e}")))?;

    Ok(Json(json!({
        "success": true,
        "result": summary,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
}

/// GET /emails/search — debug read-through to the mailbox.
pub async fn search_emails(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    let emails = state
        .processor
        .search(params.query.as_deref())
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("search failed: {e}")))?;

    Ok(Json(json!({
        "success": true,
        "emails": emails,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub fecha_generacion: String,
    pub drive_folder_id: String,
    #[serde(default)]
    pub force: bool,
}

/// POST /extraccion_generacion — sync one generation folder into the store.
pub async fn sync_generation(
    State(state): State<SharedState>,
    Json(payload): Json<SyncRequest>,
) -> ApiResult<Json<Value>> {
    if payload.fecha_generacion.len() != 8
        || normalize::coerce_date(&payload.fecha_generacion).is_none()
    {
        return Err(ApiError::bad_request(format!(
            "fecha_generacion '{}' must be a valid YYYYMMDD date",
            payload.fecha_generacion
        )));
    }
    if payload.drive_folder_id.trim().is_empty() {
        return Err(ApiError::bad_request("drive_folder_id must not be empty"));
    }

    let report = state
        .sync
        .sync_generation(&payload.fecha_generacion, &payload.drive_folder_id, payload.force)
        .await
        .map_err(|SyncError::InProgress(generation)| ApiError::SyncInProgress(generation))?;

    Ok(Json(json!({
        "success": true,
        "report": report,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub branch_id: Option<i32>,
    pub generation: Option<String>,
    pub days_ahead: Option<i64>,
}

/// GET /reports/{dataset_id} — serve a cached (or freshly built) dataset.
pub async fn get_report(
    State(state): State<SharedState>,
    Path(dataset_id): Path<String>,
    Query(params): Query<ReportParams>,
) -> ApiResult<Json<Value>> {
    let days_ahead = params.days_ahead.or(match dataset_id.as_str() {
        pipeline::UPCOMING_BIRTHDAYS => Some(state.birthday_days_ahead),
        _ => Some(state.arrival_days_ahead),
    });

    let result = state
        .reports
        .prepare(
            &dataset_id,
            params.branch_id,
            params.generation.as_deref(),
            days_ahead,
        )
        .await
        .map_err(|error| match &error {
            ReportError::UnknownDataset(name) => ApiError::NotFound(format!("dataset {name}")),
            ReportError::InvalidBranch(_) | ReportError::InvalidGeneration(_) => {
                ApiError::bad_request(error.to_string())
            }
            ReportError::Pipeline(_) => ApiError::Internal(anyhow::anyhow!(error.to_string())),
        })?;

    Ok(Json(json!({
        "success": true,
        "dataset": result,
    })))
}

/// GET /reports/cache/metrics — read-only cache counters.
pub async fn cache_metrics(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "metrics": state.reports.cache_metrics(),
    }))
}
