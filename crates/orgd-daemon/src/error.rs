//! Error translation at the HTTP boundary.
//!
//! Domain-coded failures travel as a structured `StatusReply` on a 200
//! response so clients branch on the code; only identity problems and truly
//! unexpected failures use the HTTP status itself.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use orgd_schemas::{ErrorCode, ServiceError, StatusReply};

#[derive(Debug)]
pub enum ApiError {
    /// Domain failure with a wire code (NOT_FOUND, INVALID_PARENT, ...).
    Service(ServiceError),
    /// Missing or malformed identity headers.
    Unauthorized(String),
    /// Anything unexpected. Logged here; the caller sees a generic 500.
    Internal(anyhow::Error),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

/// Map a datastore failure to the structured DATABASE_ERROR code, keeping
/// the underlying message.
pub fn db_err(err: anyhow::Error) -> ApiError {
    warn!("database error: {err:#}");
    ApiError::Service(ServiceError::new(ErrorCode::DatabaseError, format!("{err:#}")))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Service(err) => {
                (StatusCode::OK, Json(StatusReply::from(err))).into_response()
            }
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            ApiError::Internal(err) => {
                error!("handler failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
