//! Core Error Types
//!
//! The error taxonomy of the retrieval subsystem. Four variants carry the
//! domain failures (configuration, provider, validation, retrieval); the rest
//! wrap ambient failures from I/O and serialization.
//!
//! Expected conditions such as "index not ready" or "document skipped during
//! batch embedding" are not errors: services report them through result
//! values and reserve `CoreError` for failures the caller has to handle.

use thiserror::Error;

/// Error type for the document retrieval workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Unknown provider/backend type or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote or local embedding call failed or the provider is unreachable
    #[error("Provider error: {0}")]
    Provider(String),

    /// Dimension mismatch, missing vector, or malformed document
    #[error("Validation error: {0}")]
    Validation(String),

    /// Search attempted against an unusable index, or an index build failed
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a retrieval error
    pub fn retrieval(msg: impl Into<String>) -> Self {
        Self::Retrieval(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable kind, used when an error is flattened into a
    /// result's `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Provider(_) => "provider",
            Self::Validation(_) => "validation",
            Self::Retrieval(_) => "retrieval",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
