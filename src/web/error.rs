// Error taxonomy shared by the pipelines and the HTTP layer

use hyper::StatusCode;

/// Failure categories for image processing requests.
///
/// Each variant maps to one HTTP status code. Batch processing converts
/// per-item errors into error results instead of propagating them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Bad file type or malformed request. Never retried.
    #[error("{0}")]
    InvalidInput(String),

    /// Folder or file missing.
    #[error("{0}")]
    NotFound(String),

    /// Model not loaded, failed to load, or the inference queue is full.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// The model call itself failed.
    #[error("{0}")]
    Inference(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ApiError::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        ApiError::Inference(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::invalid_input("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("missing").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::unavailable("not ready").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::inference("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_is_message_only() {
        let err = ApiError::not_found("Folder not found: /tmp/nope");
        assert_eq!(err.to_string(), "Folder not found: /tmp/nope");
    }
}
