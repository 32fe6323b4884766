use thiserror::Error;

/// Errors surfaced by the image processor and the photo lifecycle service
#[derive(Error, Debug)]
pub enum PhotoError {
    /// Bad input shape or unsupported file type, rejected before any side effect
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requester is not the owner of the photo
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Lifecycle transition not allowed from the current state
    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Watermark/codec failure, or an operation the photo's state forbids
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Store or network failure; the caller may retry
    #[error("Transient infrastructure failure: {0}")]
    Transient(String),
}

impl PhotoError {
    /// Whether re-driving the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PhotoError::Transient(_))
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PhotoError::Validation(_) => "VALIDATION_ERROR",
            PhotoError::Unauthorized(_) => "UNAUTHORIZED",
            PhotoError::StateConflict(_) => "STATE_CONFLICT",
            PhotoError::NotFound(_) => "NOT_FOUND",
            PhotoError::Processing(_) => "PROCESSING_ERROR",
            PhotoError::Transient(_) => "TRANSIENT_ERROR",
        }
    }
}

impl From<anyhow::Error> for PhotoError {
    fn from(err: anyhow::Error) -> Self {
        PhotoError::Transient(format!("{err:#}"))
    }
}

pub type PhotoResult<T> = Result<T, PhotoError>;
