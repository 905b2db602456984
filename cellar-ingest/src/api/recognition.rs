//! Label recognition API handlers
//!
//! POST /api/recognition, POST /api/recognition/test,
//! GET /api/recognition/attempts/:id, POST /api/recognition/:id/feedback

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::CallerId;
use crate::api::extract::ApiJson;
use crate::db::attempts;
use crate::models::{AttemptStatus, RecognitionAttempt, RecognitionFeedback};
use crate::services::match_engine::{RecognitionMode, RecognitionRequest, RecognitionResult};
use crate::services::vision_client::LabelImage;
use crate::{ApiError, ApiResult, AppState};

/// POST /api/recognition request
#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    /// Base64 image, optionally as a `data:` URI
    #[serde(alias = "image")]
    pub image_base64: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /api/recognition/:id/feedback request
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub product_id: Option<String>,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub success: bool,
    pub feedback_id: i64,
}

async fn run_recognition(
    state: &AppState,
    user_id: String,
    request: RecognizeRequest,
    mode: RecognitionMode,
) -> ApiResult<Json<RecognitionResult>> {
    let image = LabelImage::from_base64(&request.image_base64).map_err(ApiError::BadRequest)?;
    let session_id = request.session_id.filter(|s| !s.trim().is_empty());

    let result = state
        .match_engine()
        .recognize(RecognitionRequest {
            user_id,
            session_id,
            image,
            mode,
        })
        .await?;

    Ok(Json(result))
}

/// POST /api/recognition
///
/// Returns 200 for every business outcome, including unreadable labels.
/// Provider failures map to 429 / 402 / 502 after the attempt is recorded.
pub async fn recognize(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    ApiJson(request): ApiJson<RecognizeRequest>,
) -> ApiResult<Json<RecognitionResult>> {
    run_recognition(&state, user_id, request, RecognitionMode::Standard).await
}

/// POST /api/recognition/test
pub async fn recognize_test(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    ApiJson(request): ApiJson<RecognizeRequest>,
) -> ApiResult<Json<RecognitionResult>> {
    run_recognition(&state, user_id, request, RecognitionMode::Test).await
}

/// GET /api/recognition/attempts/:id
pub async fn get_attempt(
    State(state): State<AppState>,
    _caller: CallerId,
    Path(attempt_id): Path<Uuid>,
) -> ApiResult<Json<RecognitionAttempt>> {
    attempts::get_attempt(&state.db, attempt_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Recognition attempt {}", attempt_id)))
}

/// POST /api/recognition/:id/feedback
///
/// The attempt row itself is never modified; feedback is a separate record.
pub async fn submit_feedback(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(attempt_id): Path<Uuid>,
    ApiJson(request): ApiJson<FeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    let attempt = attempts::get_attempt(&state.db, attempt_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Recognition attempt {}", attempt_id)))?;

    if attempt.status == AttemptStatus::Processing {
        return Err(ApiError::Conflict(format!(
            "Recognition attempt {} is still processing",
            attempt_id
        )));
    }

    let feedback_id = attempts::insert_feedback(
        &state.db,
        &RecognitionFeedback {
            attempt_id,
            user_id,
            product_id: request.product_id.filter(|p| !p.trim().is_empty()),
            accepted: request.accepted,
        },
    )
    .await?;

    tracing::info!(
        attempt_id = %attempt_id,
        accepted = request.accepted,
        "Recognition feedback recorded"
    );

    Ok(Json(FeedbackResponse {
        success: true,
        feedback_id,
    }))
}

pub fn recognition_routes() -> Router<AppState> {
    Router::new()
        .route("/api/recognition", post(recognize))
        .route("/api/recognition/test", post(recognize_test))
        .route("/api/recognition/attempts/:id", get(get_attempt))
        .route("/api/recognition/:id/feedback", post(submit_feedback))
}
