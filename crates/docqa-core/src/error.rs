use thiserror::Error;

/// Top-level error type for the docqa system.
///
/// Component crates return this type directly so that the `?` operator works
/// across crate boundaries. Ingestion aggregates these per document instead
/// of propagating them; queries propagate them to the caller unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DocqaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{service} service unavailable: {message}")]
    ServiceUnavailable { service: String, message: String },

    #[error("Dimension mismatch: index holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Schema violation: {reason}")]
    SchemaViolation { reason: String, raw_output: String },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DocqaError {
    /// Shorthand for a `ServiceUnavailable` error from the named service.
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        DocqaError::ServiceUnavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Whether a bounded retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DocqaError::ServiceUnavailable { .. } | DocqaError::GenerationFailed(_)
        )
    }
}

impl From<toml::de::Error> for DocqaError {
    fn from(err: toml::de::Error) -> Self {
        DocqaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DocqaError {
    fn from(err: toml::ser::Error) -> Self {
        DocqaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DocqaError {
    fn from(err: serde_json::Error) -> Self {
        DocqaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for docqa operations.
pub type Result<T> = std::result::Result<T, DocqaError>;
