//! Error handling for esq-exporter
//!
//! Provides the error taxonomy shared by configuration loading and response
//! extraction. Scheduler tasks use [`Error::category`] to label error counters.

/// Result type alias for esq-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for configuration and extraction
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A path segment could not be resolved in a document
    #[error("Path '{path}' not found: segment '{segment}' (index {index}) is missing")]
    PathNotFound {
        path: String,
        segment: String,
        index: usize,
    },

    /// A path resolved, but to a value of the wrong type
    #[error("Value at '{path}' has type {found}, expected {expected}")]
    ValueTypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The response document is not a mapping
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The bucket collection is absent or not a sequence
    #[error("Missing buckets: {0}")]
    MissingBuckets(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed_response(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a missing buckets error
    pub fn missing_buckets(msg: impl Into<String>) -> Self {
        Self::MissingBuckets(msg.into())
    }

    /// Whether the error only affects a single bucket/hit rather than a whole cycle
    pub fn is_item_error(&self) -> bool {
        matches!(self, Error::PathNotFound { .. } | Error::ValueTypeMismatch { .. })
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::PathNotFound { .. } => "path_not_found",
            Error::ValueTypeMismatch { .. } => "value_type_mismatch",
            Error::MalformedResponse(_) => "malformed_response",
            Error::MissingBuckets(_) => "missing_buckets",
        }
    }
}
