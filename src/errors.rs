use crate::services::{
    account_service::AccountError,
    admin_service::AdminError,
    project_service::ProjectError,
    publish_service::{DeleteError, ErrorClass, PublishError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Database details stay in the server log.
fn storage_failure(err: &sqlx::Error) -> AppError {
    tracing::error!(error = %err, "database error");
    AppError::internal("Internal server error")
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match (&err, err.class()) {
            (PublishError::ProjectNotFound, _) => AppError::not_found("Project not found"),
            (PublishError::TooManyFiles { .. } | PublishError::FileTooLarge { .. }, _) => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            (_, ErrorClass::Precondition) => AppError::bad_request(err.to_string()),
            (_, ErrorClass::Upload) => AppError::internal("Upload failed"),
            (PublishError::Record(db), _) => storage_failure(db),
            (_, ErrorClass::Internal) => AppError::internal("Internal server error"),
        }
    }
}

impl From<DeleteError> for AppError {
    fn from(err: DeleteError) -> Self {
        match &err {
            DeleteError::NotFound(_) => AppError::not_found("Deployment not found"),
            DeleteError::Record(db) => storage_failure(db),
        }
    }
}

impl From<ProjectError> for AppError {
    fn from(err: ProjectError) -> Self {
        match &err {
            ProjectError::Sqlx(db) => storage_failure(db),
            ProjectError::SubdomainExhausted(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            _ => AppError::bad_request(err.to_string()),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match &err {
            AdminError::DeploymentNotFound(_) => AppError::not_found("Deployment not found"),
            AdminError::JobNotFound(_) => AppError::not_found("Job not found"),
            AdminError::JobNotPending(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            AdminError::UserNotFound(_) => AppError::not_found("User not found"),
            AdminError::CdnNotConfigured => AppError::bad_request(err.to_string()),
            AdminError::Cdn(cdn) => {
                tracing::error!(error = %cdn, "CDN invalidation failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to clear cache")
            }
            AdminError::Sqlx(db) => storage_failure(db),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match &err {
            AccountError::Sqlx(db) => storage_failure(db),
            _ => AppError::bad_request(err.to_string()),
        }
    }
}
