use axum::http::StatusCode;
use thiserror::Error;

use crate::models::{ApiError, ErrorResponse};

/// Failures of the document store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the synchronization core.
///
/// `DocumentNotFound` and `AccessDenied` are terminal for a session open.
/// `SaveFailure` and `UploadFailure` are recoverable: dirty state survives and
/// the triggering action can be retried.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document '{0}' not found")]
    DocumentNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("upload failed: {0}")]
    UploadFailure(String),

    #[error("save failed: {0}")]
    SaveFailure(String),

    #[error("session is read-only")]
    ReadOnly,

    #[error("no share link at index {0}")]
    InvalidShareLink(usize),

    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("session is closed")]
    SessionClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::AccessDenied(_) => StatusCode::FORBIDDEN,
            SyncError::ReadOnly => StatusCode::FORBIDDEN,
            SyncError::InvalidShareLink(_) | SyncError::InvalidAttachment(_) => StatusCode::BAD_REQUEST,
            SyncError::SessionClosed => StatusCode::CONFLICT,
            SyncError::UploadFailure(_) => StatusCode::BAD_GATEWAY,
            SyncError::SaveFailure(_) | SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Terminal errors force the caller out of the session view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::DocumentNotFound(_) | SyncError::AccessDenied(_))
    }

    pub fn into_api_error(self) -> ApiError {
        ErrorResponse::with_status(self.status_code(), self.to_string())
    }
}
