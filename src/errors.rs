use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error; // Use thiserror for cleaner error definitions
use uuid::Uuid;

use crate::imagedata::ImageDataError;

// --- Domain/Infrastructure Errors ---

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Meme not found with ID: {0}")]
    NotFound(Uuid),

    #[error("Stored meme data is corrupt: {0}")]
    DataCorruption(String),

    #[error("Database backend error: {0}")]
    BackendError(#[from] anyhow::Error), // Wrap Anyhow errors from DB layer
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File upload failed: {0}")]
    UploadFailed(String),

    #[error("File not found with key: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    BackendError(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no bearer token provided")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

// --- Web Layer Error ---

#[derive(Error, Debug)]
pub enum AppError {
    // Input validation / request parsing errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing required fields")]
    MissingFields,
    #[error("Invalid image data: {0}")]
    InvalidImage(#[from] ImageDataError),
    #[error("Invalid meme ID format: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] JsonRejection),
    #[error("Invalid query string: {0}")]
    InvalidQuery(#[from] QueryRejection),

    // Caller errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Unauthorized: invalid token")]
    InvalidToken,
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Domain/Service level errors (mapped from RepoError/StorageError)
    #[error("Meme not found with ID: {0}")]
    MemeNotFound(Uuid),
    #[error("Could not access meme data")]
    RepositoryError(#[source] RepoError),
    #[error("Could not perform file storage operation")]
    StorageError(#[source] StorageError),
    #[error("Could not verify credentials")]
    AuthBackendError(#[source] AuthError),

    // Startup errors
    #[error("Initialization error: {0}")]
    InitError(String),
}

// --- Conversions from Domain Errors to AppError ---

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(id) => AppError::MemeNotFound(id),
            e => AppError::RepositoryError(e),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::StorageError(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => AppError::Unauthorized("No token provided".to_string()),
            AuthError::InvalidToken(reason) => {
                tracing::debug!(%reason, "Rejecting bearer token");
                AppError::InvalidToken
            }
            e @ AuthError::KeysUnavailable(_) => AppError::AuthBackendError(e),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_)
            | AppError::MissingFields
            | AppError::InvalidImage(_)
            | AppError::InvalidUuid(_)
            | AppError::InvalidJson(_)
            | AppError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::InvalidToken => StatusCode::FORBIDDEN,
            AppError::MemeNotFound(_) => StatusCode::NOT_FOUND,
            AppError::RepositoryError(_)
            | AppError::StorageError(_)
            | AppError::AuthBackendError(_)
            | AppError::InitError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// --- Axum Response Implementation ---

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            // 4xx Client Errors
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::MissingFields => "Missing required fields".to_string(),
            AppError::InvalidImage(e) => format!("Invalid image data: {}", e),
            AppError::InvalidUuid(e) => format!("Invalid ID format: {}", e),
            AppError::InvalidJson(e) => format!("Invalid JSON body: {}", e.body_text()),
            AppError::InvalidQuery(e) => format!("Invalid query string: {}", e.body_text()),
            AppError::Unauthorized(msg) => format!("Unauthorized: {}", msg),
            AppError::InvalidToken => "Unauthorized: Invalid token".to_string(),
            AppError::Forbidden(msg) => format!("Forbidden: {}", msg),
            AppError::MemeNotFound(_) => "Meme not found".to_string(),

            // 5xx Server Errors
            AppError::RepositoryError(e) => {
                tracing::error!(error.source = ?e, "Repository error occurred");
                "Database operation failed".to_string()
            }
            AppError::StorageError(e) => {
                tracing::error!(error.source = ?e, "Storage error occurred");
                "File storage operation failed".to_string()
            }
            AppError::AuthBackendError(e) => {
                tracing::error!(error.source = ?e, "Token verification backend failed");
                "Could not verify credentials".to_string()
            }
            AppError::InitError(msg) => {
                tracing::error!("Initialization error: {}", msg);
                "Server initialization error".to_string()
            }
        };

        if status.is_server_error() {
            tracing::error!(error.message = %error_message, error.detail = %self, "Responding with error");
        } else {
            tracing::debug!(error.message = %error_message, error.status = %status, "Responding with client error");
        }

        let body = Json(serde_json::json!({ "error": error_message }));
        (status, body).into_response()
    }
}
