//! # esq-metrics
//!
//! Prometheus publishing for esq-exporter.
//!
//! This crate provides:
//! - A registry of gauge families whose label schemas are fixed on first use
//! - Self-observability metrics for query execution
//! - The HTTP endpoint serving `/metrics` and `/health`

pub mod common;
pub mod endpoint;
pub mod registry;

// Re-export commonly used types
pub use common::QueryMetrics;
pub use endpoint::MetricsEndpoint;
pub use registry::{MetricRegistry, MetricSeries};

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metric {metric} already registered with labels {expected:?}, got {found:?}")]
    SchemaConflict {
        metric: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MetricsError {
    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            MetricsError::SchemaConflict { .. } => "schema_conflict",
            MetricsError::Registry(_) => "registry",
            MetricsError::Export(_) => "export",
            MetricsError::Io(_) => "io",
            MetricsError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, MetricsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_conflict_message() {
        let err = MetricsError::SchemaConflict {
            metric: "app_errors".to_string(),
            expected: vec!["host".to_string()],
            found: vec!["level".to_string()],
        };
        assert_eq!(err.category(), "schema_conflict");
        assert_eq!(
            err.to_string(),
            r#"Metric app_errors already registered with labels ["host"], got ["level"]"#
        );
    }
}
