//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::GuardError;
use fulfillment::FulfillmentError;
use fulfillment_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller could not be identified or the request was not signed.
    Unauthorized(String),
    /// Fulfillment workflow error.
    Fulfillment(FulfillmentError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    let status = match &err {
        FulfillmentError::Guard(GuardError::InvalidPickupWindow) => StatusCode::BAD_REQUEST,
        FulfillmentError::Guard(_) | FulfillmentError::Rejected(_) => StatusCode::CONFLICT,
        FulfillmentError::NotPermitted(_) => StatusCode::FORBIDDEN,
        FulfillmentError::LineItemNotFound(_)
        | FulfillmentError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        FulfillmentError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
        FulfillmentError::LeaseHeld(_) => StatusCode::CONFLICT,
        err if err.is_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "fulfillment request failed");
    }
    (status, err.to_string())
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::LineItemId;

    fn status_of(err: FulfillmentError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_guard_violation_is_conflict() {
        let err = GuardError::invalid("receive", "active");
        assert_eq!(status_of(err.into()), StatusCode::CONFLICT);
    }

    #[test]
    fn test_bad_pickup_window_is_bad_request() {
        let err = FulfillmentError::Guard(GuardError::InvalidPickupWindow);
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(FulfillmentError::NotPermitted("seller only".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(FulfillmentError::LineItemNotFound(LineItemId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(FulfillmentError::InvalidEvent("bad json".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(FulfillmentError::Payment("declined".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_version_conflict_is_conflict() {
        let err = StoreError::ConcurrencyConflict {
            entity_type: "line_item",
            entity_id: uuid::Uuid::new_v4(),
            expected: common::Version::initial(),
        };
        assert_eq!(status_of(err.into()), StatusCode::CONFLICT);
    }
}
