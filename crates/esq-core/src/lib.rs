//! # esq-core
//!
//! Core types for esq-exporter, an exporter that polls search queries and
//! republishes the numbers found in their responses as Prometheus gauges.
//!
//! This crate provides:
//!
//! - The query specification and exporter configuration schema
//! - The error taxonomy shared by the other crates
//! - Dotted path resolution over untyped response documents
//! - Response walkers that turn bucket and hit-count responses into observations

pub mod config;
pub mod error;
pub mod path;
pub mod walker;

// Re-export commonly used types at the crate root
pub use config::{
    ElasticsearchConfig, ExporterConfig, LabelMapping, MetricsConfig, QuerySpec, QueryType,
    QUERY_NAME_LABEL,
};
pub use error::{Error, Result};
pub use walker::{total_hits, ExtractedObservation, Observations, ResultWalker};
