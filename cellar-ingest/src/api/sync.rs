//! Sync API handlers
//!
//! POST /api/sync, GET /api/sync/runs/:id

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::ApiJson;
use crate::db::sync_runs;
use crate::models::{SyncRun, SyncRunType, SyncStats, SyncStatus};
use crate::{ApiError, ApiResult, AppState};

/// POST /api/sync request
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub sync_type: String,
}

/// POST /api/sync response
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub stats: SyncStats,
    pub sync_run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/sync
///
/// Runs to completion within the request. A failed run still answers 200
/// with `success: false` and the stage that failed; 409 when another run
/// holds the sync lease.
pub async fn start_sync(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SyncRequest>,
) -> ApiResult<Json<SyncResponse>> {
    let run_type: SyncRunType = request.sync_type.parse().map_err(ApiError::BadRequest)?;

    let run = state.sync_engine()?.run(run_type).await?;

    if let Some(error) = &run.error {
        state.record_error(format!("sync {}: {}", run.id, error)).await;
    }

    Ok(Json(SyncResponse {
        success: run.status == SyncStatus::Success,
        stats: run.stats,
        sync_run_id: run.id,
        error: run.error,
    }))
}

/// GET /api/sync/runs/:id
pub async fn get_sync_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<SyncRun>> {
    sync_runs::get_run(&state.db, run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Sync run {}", run_id)))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync", post(start_sync))
        .route("/api/sync/runs/:id", get(get_sync_run))
}
