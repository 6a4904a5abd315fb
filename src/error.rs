use crate::engine::OcrMethod;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a single recognition tier.
///
/// These never cross the resolver boundary on their own: they decide whether
/// the next tier is tried and are attached to [`ResolveError`] for diagnosis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecognizerError {
    #[error("no credential configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("recognizer returned no text")]
    EmptyResult,

    #[error("engine error: {0}")]
    Engine(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl RecognizerError {
    /// A missing credential routes to the next tier silently.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }
}

/// One tier's reason for not producing a result
#[derive(Debug, Clone, PartialEq)]
pub struct TierFailure {
    pub method: OcrMethod,
    pub error: RecognizerError,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.method, self.error)
    }
}

/// Every tier has been exhausted without a result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("all OCR tiers failed ({})", join_failures(.failures))]
    Exhausted { failures: Vec<TierFailure> },
}

impl ResolveError {
    pub fn failures(&self) -> &[TierFailure] {
        match self {
            Self::Exhausted { failures } => failures,
        }
    }
}

fn join_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("failed to decode stored document: {0}")]
    Decode(String),
}

/// Errors surfaced by the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing file in request")]
    MissingFile,

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("File type {extension} not supported. Allowed types: {allowed}")]
    UnsupportedFileType { extension: String, allowed: String },

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    /// The upload was cut off by the request body limit before it was fully read
    #[error("File too large (max: {max} bytes)")]
    UploadTooLarge { max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Error processing document: {0}")]
    OcrFailed(#[from] ResolveError),

    #[error("Document {0} not found")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Storage(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            ApiError::EmptyFile => (StatusCode::BAD_REQUEST, "EMPTY_FILE"),
            ApiError::UnsupportedFileType { .. } => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_FILE_TYPE")
            }
            ApiError::FileTooLarge { .. } | ApiError::UploadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE")
            }
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::OcrFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "OCR_FAILED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = Json(ErrorResponse {
            success: false,
            message: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
