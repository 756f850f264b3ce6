//! Mapping from `LesionError` to HTTP responses.
//!
//! Client errors carry their message in `detail`. Server errors are logged
//! in full and answered with a generic `detail`.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::{ErrorClass, LesionError};

const INTERNAL_DETAIL: &str = "Internal server error";
const UNAVAILABLE_DETAIL: &str = "Service temporarily unavailable";

/// Error response with a status and a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

fn status_for(err: &LesionError) -> StatusCode {
    match err.class() {
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LesionError> for ApiError {
    fn from(err: LesionError) -> Self {
        let status = status_for(&err);

        if err.is_client_error() {
            tracing::debug!("Client error ({status}): {err}");
            return Self::new(status, err.to_string());
        }
        if err.class() == ErrorClass::Unavailable {
            tracing::warn!("Request refused: {err}");
            return Self::new(status, UNAVAILABLE_DETAIL);
        }

        tracing::error!("Request failed: {err}");
        Self::new(status, INTERNAL_DETAIL)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // Syntax, type and content-type problems are all malformed requests.
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
