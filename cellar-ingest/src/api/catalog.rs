//! Catalog maintenance endpoints

use axum::{extract::State, routing::post, Json, Router};

use crate::services::catalog_embedder::{refresh_embeddings, EmbeddingRefresh};
use crate::{ApiError, ApiResult, AppState};

/// POST /api/catalog/embeddings/refresh
pub async fn refresh(State(state): State<AppState>) -> ApiResult<Json<EmbeddingRefresh>> {
    let provider = state
        .embeddings
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("No embedding provider configured".to_string()))?;

    let refresh = refresh_embeddings(&state.db, provider.as_ref()).await?;
    Ok(Json(refresh))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new().route("/api/catalog/embeddings/refresh", post(refresh))
}
