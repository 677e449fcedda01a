use application::ApplicationError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// 失败响应：`{"success": false, "data": null, "error": {...}}`
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    data: Option<()>,
    error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let code = error.code();
        match &error {
            ApplicationError::Domain(DomainError::InvalidId { .. })
            | ApplicationError::Domain(DomainError::InvalidArgument { .. }) => {
                ApiError::new(StatusCode::BAD_REQUEST, code, error.to_string())
            }
            ApplicationError::RoomNotFound(_)
            | ApplicationError::UserNotFound(_)
            | ApplicationError::Repository(RepositoryError::NotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, code, error.to_string())
            }
            ApplicationError::Repository(RepositoryError::Conflict) => {
                ApiError::new(StatusCode::CONFLICT, code, "resource already exists")
            }
            ApplicationError::Repository(RepositoryError::Unavailable { message }) => {
                tracing::error!(error = %message, "store unavailable");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "store temporarily unavailable",
                )
            }
            ApplicationError::NotIdentified => {
                tracing::error!(error = %error, "unexpected error on http path");
                ApiError::internal_server_error("internal error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), "BAD_REQUEST", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            success: false,
            data: None,
            error: self.body,
        };
        (self.status, Json(envelope)).into_response()
    }
}
