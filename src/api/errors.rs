use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::sessions::SessionError;

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    message: String,
    data: Option<()>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Logs the underlying error and hides it behind a stable message.
    pub(crate) fn internal(err: impl std::fmt::Display, message: &str) -> Self {
        tracing::error!(error = %err, "{message}");
        Self::Internal(message.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ExamNotActive => ApiError::NotFound(err.to_string()),
            SessionError::AlreadyCompleted
            | SessionError::TokenInvalid
            | SessionError::QuestionNotFound(_)
            | SessionError::Validation(_) => ApiError::BadRequest(err.to_string()),
            SessionError::Db(db_err) => ApiError::internal(db_err, "Database operation failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message.to_string()),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        let is_unauthorized = status == StatusCode::UNAUTHORIZED;
        let mut response =
            (status, Json(ErrorEnvelope { success: false, message, data: None })).into_response();

        if is_unauthorized {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}
