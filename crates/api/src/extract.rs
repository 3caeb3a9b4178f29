//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

/// Header carrying the authenticated user, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user a request is made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl<St: Send + Sync> FromRequestParts<St> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))?;
        let raw = value
            .to_str()
            .map_err(|_| ApiError::BadRequest("X-User-Id is not valid text".to_string()))?;
        let id = raw
            .trim()
            .parse::<UserId>()
            .map_err(|e| ApiError::BadRequest(format!("Invalid X-User-Id: {e}")))?;
        Ok(Caller(id))
    }
}
