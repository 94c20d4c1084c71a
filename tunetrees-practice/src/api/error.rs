//! HTTP mapping of practice errors
//!
//! Errors are rendered as `{"error": {"code": ..., "message": ...}}` with a
//! status that matches the failure class.

use crate::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

impl Error {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Error::InvalidGrade(_) => (StatusCode::BAD_REQUEST, "INVALID_GRADE"),
            Error::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            Error::Scheduling(_) => (StatusCode::UNPROCESSABLE_ENTITY, "SCHEDULING_ERROR"),
            Error::Fetch(_) => (StatusCode::BAD_GATEWAY, "FETCH_FAILED"),
            Error::Staging(_) => (StatusCode::BAD_GATEWAY, "STAGING_FAILED"),
            Error::Submit(_) => (StatusCode::BAD_GATEWAY, "SUBMIT_FAILED"),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            Error::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
            Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Error::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, "Request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
