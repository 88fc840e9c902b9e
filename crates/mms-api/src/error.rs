//! Error to HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error, warn};

use mms_core::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Any failure surfaced by a handler.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Parse(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) | Error::Concealed(_) => StatusCode::NOT_FOUND,
            Error::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Store { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::ServerBug(_)
            | Error::Request(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Error::Concealed(reason) = &self.0 {
            debug!(subsystem = "api", reason = %reason, "Concealed as not found");
            return status.into_response();
        }
        if status.is_server_error() {
            error!(subsystem = "api", status = status.as_u16(), error = %self.0, "Request failed");
        } else if status == StatusCode::GATEWAY_TIMEOUT {
            warn!(subsystem = "api", error = %self.0, "Store call timed out; outcome indeterminate");
        }

        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let Some(condition) = self.0.condition() {
            body["condition"] = serde_json::Value::from(condition);
        }
        (status, Json(body)).into_response()
    }
}
