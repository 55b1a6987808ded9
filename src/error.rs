use thiserror::Error;

/// Structured error type for the control plane and persistence paths.
///
/// Nothing in the render loop returns this: renderers substitute defined
/// colors for bad state instead of failing (out-of-range palette indices
/// become the error color, missing targets render black).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("cannot remove the last {what}")]
    LastChild { what: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound { what: what.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
        }
    }
}
