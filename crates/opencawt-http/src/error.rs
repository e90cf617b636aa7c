//! Maps `OpenCawtError` onto the wire error envelope (spec §6/§7):
//! `{"error": {"code": "...", "message": "..."}}` plus a status code
//! derived from `ErrorKind`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opencawt_core::error::{ErrorKind, OpenCawtError};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "retry_after_s")]
    retry_after_s: Option<u64>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

pub struct ApiError(pub OpenCawtError);

impl From<OpenCawtError> for ApiError {
    fn from(e: OpenCawtError) -> Self {
        ApiError(e)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Role => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if matches!(kind, ErrorKind::Internal) {
            tracing::error!(error = %self.0, code = self.0.code(), "request failed");
        }
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.0.code(),
                message: self.0.to_string(),
                details: self.0.details(),
                retry_after_s: self.0.retry_after_s(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
