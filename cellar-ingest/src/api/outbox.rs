//! Outbox API handlers
//!
//! POST /api/outbox/submit, POST /api/outbox/dispatch, GET /api/outbox/jobs/:id

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::ApiJson;
use crate::db::outbox;
use crate::models::{DispatchResult, JobType, OutboxJob, OutboxStatus};
use crate::{ApiError, ApiResult, AppState};

/// POST /api/outbox/submit request
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub session_id: String,
    /// `inventory_commit` (default) or `inventory_check`
    #[serde(default)]
    pub job_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub outbox_job_id: Uuid,
    pub status: OutboxStatus,
    pub items_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub results: Vec<DispatchResult>,
}

/// POST /api/outbox/submit
///
/// Resubmitting a session whose totals have not changed returns the same job.
pub async fn submit(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SubmitRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    let job_type = match request.job_type.as_deref() {
        None => JobType::InventoryCommit,
        Some(raw) => JobType::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown job type: {}", raw)))?,
    };

    let enqueued = state
        .outbox_dispatcher()?
        .enqueue(request.session_id.trim(), job_type)
        .await?;

    Ok(Json(SubmitResponse {
        success: true,
        outbox_job_id: enqueued.job.id,
        status: enqueued.job.status,
        items_count: enqueued.items_count,
    }))
}

/// POST /api/outbox/dispatch
///
/// Body is optional; `{ "job_id": ... }` targets a single job.
pub async fn dispatch(
    State(state): State<AppState>,
    request: Option<Json<DispatchRequest>>,
) -> ApiResult<Json<DispatchResponse>> {
    let job_id = request.and_then(|Json(r)| r.job_id);
    let results = state.outbox_dispatcher()?.dispatch(job_id).await?;

    Ok(Json(DispatchResponse {
        success: results.iter().all(|r| r.status == OutboxStatus::Success),
        results,
    }))
}

/// GET /api/outbox/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<OutboxJob>> {
    outbox::get_job(&state.db, job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Outbox job {}", job_id)))
}

pub fn outbox_routes() -> Router<AppState> {
    Router::new()
        .route("/api/outbox/submit", post(submit))
        .route("/api/outbox/dispatch", post(dispatch))
        .route("/api/outbox/jobs/:id", get(get_job))
}
