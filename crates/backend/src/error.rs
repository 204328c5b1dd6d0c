//! Unified error handling for the HTTP surface.
//!
//! Handlers use `?` naturally; failures serialize as `{"detail": "<message>"}`
//! with an appropriate status code. Stable string codes used across logs and
//! per-message outcomes live in [`codes`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable error-code strings shared by logs, outcomes, and reports.
pub mod codes {
    pub const SUBJECT_PATTERN_MISMATCH: &str = "subject_pattern_mismatch";
    pub const ATTACHMENTS_MISSING: &str = "attachments_missing";
    pub const PDF_ATTACHMENT_MISSING: &str = "pdf_attachment_missing";
    pub const GENERATION_DATE_MISSING: &str = "fecha_generacion_missing";
    pub const HTML_MISSING: &str = "html_missing";

    pub const MAIL_FETCH_FAILED: &str = "mail_fetch_failed";

    pub const DRIVE_FOLDER_MISSING: &str = "drive_folder_missing";
    pub const DRIVE_UPLOAD_FAILED: &str = "drive_upload_failed";
    pub const DRIVE_ATTACHMENT_WITHOUT_DATA: &str = "drive_attachment_without_data";
    pub const DRIVE_LISTING_FAILED: &str = "drive_listing_failed";
    pub const DRIVE_DOWNLOAD_FAILED: &str = "drive_download_failed";

    pub const EXCEL_READ_FAILED: &str = "excel_read_failed";
    pub const DB_CONNECTION_FAILED: &str = "db_connection_failed";
    pub const DB_INSERT_FAILED: &str = "db_insert_failed";

    pub const SUBSCRIBER_FAILED: &str = "subscriber_failed";
    pub const SYNC_IN_PROGRESS: &str = "sync_in_progress";
    pub const INVALID_BRANCH: &str = "invalid_branch";
}

/// Error body shape for the trigger endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Unified error type for API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("sync already running for generation {0}")]
    SyncInProgress(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::SyncInProgress(generation) => {
                tracing::warn!(
                    generation_date = %generation,
                    error_code = codes::SYNC_IN_PROGRESS,
                    "rejected concurrent sync"
                );
                (StatusCode::CONFLICT, self.to_string())
            }
            ApiError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, format!("{resource} not found"))
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
