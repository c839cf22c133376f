//! Configuration management for the exporter daemon

use crate::{AgentError, Result};
use esq_core::{ExporterConfig, QuerySpec};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

/// Complete configuration for the exporter daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Backend, listener and query configuration
    #[serde(flatten)]
    pub exporter: ExporterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Show target in logs
    pub show_target: bool,

    /// Show thread IDs in logs
    pub show_thread_ids: bool,

    /// Show line numbers in logs
    pub show_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_line_numbers: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a file.
    ///
    /// `.json` files are parsed as JSON, anything else as YAML. Query bodies
    /// referenced through `query_file` are loaded relative to the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut config: AgentConfig = if is_json {
            serde_json::from_str(&content)
                .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?
        };

        config.exporter.resolve_query_bodies(path.parent())?;
        Ok(config)
    }

    /// Serialize the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AgentError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_yaml()?;
        std::fs::write(path, content)
            .map_err(|e| AgentError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.exporter.validate()?;

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(AgentError::Config(format!(
                    "Unknown log format '{}', expected 'text' or 'json'",
                    other
                )))
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(AgentError::Config("Log level cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Example configuration with one bucketed and one count-only query
    pub fn example() -> Self {
        let mut config = Self::default();
        config.exporter.elasticsearch.url = "https://localhost:9200".to_string();
        config.exporter.elasticsearch.username = Some("elastic".to_string());
        config.exporter.elasticsearch.password = Some("changeme".to_string());

        config.exporter.queries = vec![
            QuerySpec::bucketed(
                "errors_by_host",
                "app_errors",
                "doc_count",
                json!({
                    "size": 0,
                    "query": {"match": {"level": "error"}},
                    "aggs": {"0": {"terms": {"field": "host.keyword"}}}
                }),
            )
            .with_label("host", "key")
            .with_index("logs-*")
            .with_interval_seconds(30),
            QuerySpec::raw("all_logs", "log_count", json!({"query": {"match_all": {}}}))
                .with_index("logs-*"),
        ];

        config
    }
}
