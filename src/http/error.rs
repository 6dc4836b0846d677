//! HTTP rendering of [`AppError`].

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::model::GENERIC_FAIL_MESSAGE;
use crate::{AppError, ErrorKind};

pub const ERROR_CODE_HEADER: HeaderName = HeaderName::from_static("x-error-code");

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        let message = if kind == ErrorKind::Internal {
            tracing::error!(
                target: "autosentinel",
                event = "request_failed",
                code = %self.code,
                error = %self
            );
            GENERIC_FAIL_MESSAGE.to_string()
        } else {
            tracing::debug!(target: "autosentinel", event = "request_rejected", code = %self.code);
            self.message
        };

        let mut response = (status, Json(ErrorBody { error: message })).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.code) {
            response.headers_mut().insert(ERROR_CODE_HEADER, value);
        }
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation("BODY", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::validation("PATH", rejection.body_text())
    }
}
