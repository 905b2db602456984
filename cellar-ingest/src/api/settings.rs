//! Settings API endpoints
//!
//! Runtime overrides stored in the `settings` table. Database values take
//! precedence over environment variables and the TOML file.

use crate::api::extract::ApiJson;
use crate::models::ReimportPolicy;
use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

/// POST /api/settings/vision request; omitted fields are left unchanged
#[derive(Debug, Deserialize)]
pub struct VisionSettingsRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReimportPolicyRequest {
    pub policy: String,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/settings/vision
///
/// **Errors:**
/// - 400 Bad Request: nothing to set, or an empty/whitespace-only value
pub async fn set_vision_settings(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<VisionSettingsRequest>,
) -> ApiResult<Json<SettingsResponse>> {
    if payload.api_key.is_none() && payload.model.is_none() {
        return Err(ApiError::BadRequest("Provide api_key and/or model".to_string()));
    }

    let mut updated = Vec::new();

    if let Some(key) = payload.api_key {
        if !crate::config::is_valid_key(&key) {
            return Err(ApiError::BadRequest(
                "API key cannot be empty or whitespace-only".to_string(),
            ));
        }
        crate::db::settings::set_vision_api_key(&state.db, key.trim().to_string()).await?;
        updated.push("api_key");
    }

    if let Some(model) = payload.model {
        if model.trim().is_empty() {
            return Err(ApiError::BadRequest("Model name cannot be empty".to_string()));
        }
        crate::db::settings::set_vision_model(&state.db, model.trim().to_string()).await?;
        updated.push("model");
    }

    info!(fields = ?updated, "Vision settings updated");

    Ok(Json(SettingsResponse {
        success: true,
        message: format!("Updated vision {}", updated.join(" and ")),
    }))
}

/// POST /api/settings/reimport_policy
pub async fn set_reimport_policy(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ReimportPolicyRequest>,
) -> ApiResult<Json<SettingsResponse>> {
    let policy: ReimportPolicy = payload.policy.parse().map_err(ApiError::BadRequest)?;
    let value = payload.policy.trim().to_lowercase();

    crate::db::settings::set_reimport_policy(&state.db, value.clone()).await?;
    info!(?policy, "Reimport policy updated");

    Ok(Json(SettingsResponse {
        success: true,
        message: format!("Reimport policy set to {}", value),
    }))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings/vision", post(set_vision_settings))
        .route("/api/settings/reimport_policy", post(set_reimport_policy))
}
