//! Caller identity forwarded by the upstream auth layer

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::ApiError;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller; rejects the request with 401 when absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| CallerId(id.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))
    }
}
