//! # esq-search
//!
//! Search backend client for esq-exporter.
//!
//! The exporter only needs one operation from the backend: run a query body
//! and hand back the parsed response document. [`SearchClient`] captures that
//! contract; [`ElasticsearchClient`] implements it over HTTP.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod elastic;

#[cfg(any(feature = "mock", test))]
pub mod mock;

pub use elastic::ElasticsearchClient;

#[cfg(any(feature = "mock", test))]
pub use mock::MockSearchClient;

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while talking to the search backend
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Client configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl SearchError {
    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            SearchError::Config(_) => "config",
            SearchError::Transport(_) => "transport",
            SearchError::Backend { .. } => "backend",
            SearchError::Decode(_) => "decode",
        }
    }
}

/// A query to execute
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Index or index pattern; all indices when unset
    pub index: Option<String>,
    /// Query body
    pub body: Value,
}

impl SearchRequest {
    pub fn new(body: Value) -> Self {
        Self { index: None, body }
    }

    pub fn with_index(mut self, index: Option<String>) -> Self {
        self.index = index;
        self
    }
}

/// Executes queries against a document store
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run a query and return the parsed response document
    async fn execute(&self, request: &SearchRequest) -> Result<Value>;
}
