//! Exporter configuration
//!
//! Describes the search backend, the metrics listener, and the set of queries
//! to poll. Query specifications are created once at startup and are immutable
//! afterwards.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Label that every dynamic series carries first
pub const QUERY_NAME_LABEL: &str = "query_name";

/// Aggregation key used when a bucketed query does not name one
pub const DEFAULT_AGGREGATION_KEY: &str = "0";

/// Default polling interval in seconds
pub const DEFAULT_QUERY_INTERVAL_SECONDS: u64 = 60;

/// Default metrics listener port
pub const DEFAULT_METRICS_PORT: u16 = 9108;

/// Prefix of the exporter's own metrics; queries cannot publish under it
pub const RESERVED_METRIC_PREFIX: &str = "elastic_query_";

static METRIC_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").ok());

static LABEL_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").ok());

fn matches_name(pattern: &LazyLock<Option<Regex>>, name: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(name))
}

/// Top-level exporter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Search backend connection settings
    pub elasticsearch: ElasticsearchConfig,

    /// Metrics listener settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Legacy port override for the metrics listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_port: Option<u16>,

    /// Default polling interval for queries without their own
    #[serde(default = "default_query_interval", alias = "query_interval")]
    pub query_interval_seconds: u64,

    /// Queries to execute
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

/// Search backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `https://localhost:9200`
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Encoded API key, sent as `Authorization: ApiKey <key>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// PEM bundle of trusted CA certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<PathBuf>,

    /// Skip certificate verification when no CA bundle is configured
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Request timeout; no timeout is applied when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Metrics listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve the metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listener address
    #[serde(default = "default_metrics_bind_addr")]
    pub bind_addr: SocketAddr,
}

/// How a query response is turned into observations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Count-only: publishes the total hit count
    Raw,
    /// One observation per aggregation bucket
    #[default]
    #[serde(alias = "default")]
    Bucketed,
}

/// A label name and the path its value is read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    pub name: String,
    pub path: String,
}

/// A single polled query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Unique query name, published as the `query_name` label
    pub name: String,

    #[serde(rename = "type", default)]
    pub query_type: QueryType,

    /// Index or index pattern to search; all indices when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Inline query body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,

    /// File holding the query body as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_file: Option<PathBuf>,

    /// Gauge family the extracted values are published under
    pub metric_name: String,

    /// Label mappings, in label order
    #[serde(default)]
    pub labels: Vec<LabelMapping>,

    /// Path of the numeric value inside each bucket
    #[serde(default)]
    pub value_path: String,

    /// Per-query polling interval
    #[serde(default, alias = "interval", skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,

    /// Aggregation key holding the buckets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_query_interval() -> u64 {
    DEFAULT_QUERY_INTERVAL_SECONDS
}

fn default_metrics_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_METRICS_PORT))
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_metrics_bind_addr(),
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            api_key: None,
            ca_cert_path: None,
            insecure_skip_verify: false,
            timeout_seconds: None,
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            elasticsearch: ElasticsearchConfig::default(),
            metrics: MetricsConfig::default(),
            prometheus_port: None,
            query_interval_seconds: DEFAULT_QUERY_INTERVAL_SECONDS,
            queries: Vec::new(),
        }
    }
}

impl ExporterConfig {
    /// Default polling interval
    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.query_interval_seconds)
    }

    /// Effective metrics listener address, honouring `prometheus_port`
    pub fn metrics_bind_addr(&self) -> SocketAddr {
        match self.prometheus_port {
            Some(port) => SocketAddr::new(self.metrics.bind_addr.ip(), port),
            None => self.metrics.bind_addr,
        }
    }

    /// Load `query_file` bodies into `query`.
    ///
    /// Relative paths are resolved against `base_dir` when given.
    pub fn resolve_query_bodies(&mut self, base_dir: Option<&Path>) -> Result<()> {
        for spec in &mut self.queries {
            if spec.query.is_some() {
                continue;
            }
            let Some(file) = spec.query_file.as_ref() else {
                continue;
            };

            let path = match base_dir {
                Some(dir) if file.is_relative() => dir.join(file),
                _ => file.clone(),
            };

            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::config(format!(
                    "Failed to read query file {} for query {}: {}",
                    path.display(),
                    spec.name,
                    e
                ))
            })?;
            let body: Value = serde_json::from_str(&content).map_err(|e| {
                Error::config(format!(
                    "Failed to parse query file {} for query {}: {}",
                    path.display(),
                    spec.name,
                    e
                ))
            })?;

            debug!("Loaded query body for {} from {}", spec.name, path.display());
            spec.query = Some(body);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.elasticsearch.url.trim().is_empty() {
            return Err(Error::config("Elasticsearch URL cannot be empty"));
        }

        if self.query_interval_seconds == 0 {
            return Err(Error::config("Default query interval must be greater than 0"));
        }

        if self.queries.is_empty() {
            return Err(Error::config("At least one query must be configured"));
        }

        let mut names = HashSet::new();
        let mut schemas: HashMap<&str, (&str, Vec<&str>)> = HashMap::new();

        for spec in &self.queries {
            spec.validate()?;

            if !names.insert(spec.name.as_str()) {
                return Err(Error::config(format!("Duplicate query name: {}", spec.name)));
            }

            let label_names: Vec<&str> = spec
                .published_labels()
                .iter()
                .map(|label| label.name.as_str())
                .collect();
            match schemas.get(spec.metric_name.as_str()) {
                Some((first, expected)) if *expected != label_names => {
                    return Err(Error::config(format!(
                        "Queries {} and {} share metric {} with different labels: {:?} vs {:?}",
                        first, spec.name, spec.metric_name, expected, label_names
                    )));
                }
                Some(_) => {}
                None => {
                    schemas.insert(spec.metric_name.as_str(), (spec.name.as_str(), label_names));
                }
            }
        }

        Ok(())
    }
}

impl QuerySpec {
    /// Create a bucketed query with an inline body
    pub fn bucketed(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        value_path: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            name: name.into(),
            query_type: QueryType::Bucketed,
            index: None,
            query: Some(body),
            query_file: None,
            metric_name: metric_name.into(),
            labels: Vec::new(),
            value_path: value_path.into(),
            interval_seconds: None,
            aggregation: None,
        }
    }

    /// Create a count-only query with an inline body
    pub fn raw(name: impl Into<String>, metric_name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            query_type: QueryType::Raw,
            index: None,
            query: Some(body),
            query_file: None,
            metric_name: metric_name.into(),
            labels: Vec::new(),
            value_path: String::new(),
            interval_seconds: None,
            aggregation: None,
        }
    }

    /// Add a label mapping
    pub fn with_label(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.labels.push(LabelMapping {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    /// Set the per-query interval
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    /// Set the index pattern
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Label mappings that are actually published.
    ///
    /// Count-only queries publish no labels beyond `query_name`.
    pub fn published_labels(&self) -> &[LabelMapping] {
        match self.query_type {
            QueryType::Raw => &[],
            QueryType::Bucketed => &self.labels,
        }
    }

    /// Published label names, excluding `query_name`
    pub fn label_names(&self) -> Vec<String> {
        self.published_labels()
            .iter()
            .map(|label| label.name.clone())
            .collect()
    }

    /// Aggregation key holding the buckets
    pub fn aggregation_key(&self) -> &str {
        self.aggregation.as_deref().unwrap_or(DEFAULT_AGGREGATION_KEY)
    }

    /// Interval this query runs at, given the process-wide default
    pub fn effective_interval(&self, default: Duration) -> Duration {
        self.interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Validate a single query
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("Query name cannot be empty"));
        }

        if self.query.is_none() && self.query_file.is_none() {
            return Err(Error::config(format!(
                "Query {} needs either 'query' or 'query_file'",
                self.name
            )));
        }

        if self.metric_name.trim().is_empty() {
            return Err(Error::config(format!("Query {} has no metric_name", self.name)));
        }

        if !matches_name(&METRIC_NAME, &self.metric_name) {
            return Err(Error::config(format!(
                "Query {} has an invalid metric name '{}'",
                self.name, self.metric_name
            )));
        }

        if self.metric_name.starts_with(RESERVED_METRIC_PREFIX) {
            return Err(Error::config(format!(
                "Query {} cannot publish under the reserved prefix '{}'",
                self.name, RESERVED_METRIC_PREFIX
            )));
        }

        if self.query_type == QueryType::Bucketed && self.value_path.trim().is_empty() {
            return Err(Error::config(format!(
                "Bucketed query {} has no value_path",
                self.name
            )));
        }

        if self.interval_seconds == Some(0) {
            return Err(Error::config(format!(
                "Query {} interval must be greater than 0",
                self.name
            )));
        }

        let mut label_names = HashSet::new();
        for label in &self.labels {
            if label.name == QUERY_NAME_LABEL {
                return Err(Error::config(format!(
                    "Query {} cannot define reserved label '{}'",
                    self.name, QUERY_NAME_LABEL
                )));
            }
            if label.name.trim().is_empty() || label.path.trim().is_empty() {
                return Err(Error::config(format!(
                    "Query {} has a label with an empty name or path",
                    self.name
                )));
            }
            if !matches_name(&LABEL_NAME, &label.name) || label.name.starts_with("__") {
                return Err(Error::config(format!(
                    "Query {} has an invalid label name '{}'",
                    self.name, label.name
                )));
            }
            if !label_names.insert(label.name.as_str()) {
                return Err(Error::config(format!(
                    "Query {} defines label '{}' twice",
                    self.name, label.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_config() -> ExporterConfig {
        ExporterConfig {
            queries: vec![QuerySpec::bucketed(
                "errors_by_host",
                "app_errors",
                "doc_count",
                json!({"size": 0}),
            )
            .with_label("host", "key")],
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ExporterConfig::default();
        assert_eq!(config.query_interval_seconds, 60);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.bind_addr.port(), DEFAULT_METRICS_PORT);
        assert!(!config.elasticsearch.insecure_skip_verify);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
elasticsearch:
  url: https://es.internal:9200
  username: exporter
  password: secret
query_interval_seconds: 30
queries:
  - name: errors_by_host
    type: bucketed
    query: {"size": 0}
    metric_name: app_errors
    labels:
      - name: host
        path: key
    value_path: doc_count
  - name: total_logs
    type: raw
    query: {"query": {"match_all": {}}}
    metric_name: total_logs
    interval_seconds: 10
"#;
        let config: ExporterConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.queries.len(), 2);
        assert_eq!(config.queries[0].query_type, QueryType::Bucketed);
        assert_eq!(config.queries[1].query_type, QueryType::Raw);
        assert_eq!(config.queries[0].labels[0].name, "host");
        assert_eq!(
            config.queries[1].effective_interval(config.default_interval()),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.queries[0].effective_interval(config.default_interval()),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_default_type_alias() {
        let spec: QuerySpec = serde_json::from_value(json!({
            "name": "q",
            "type": "default",
            "query": {},
            "metric_name": "m",
            "value_path": "doc_count"
        }))
        .unwrap();
        assert_eq!(spec.query_type, QueryType::Bucketed);
    }

    #[test]
    fn test_prometheus_port_override() {
        let mut config = ExporterConfig::default();
        assert_eq!(config.metrics_bind_addr().port(), DEFAULT_METRICS_PORT);
        config.prometheus_port = Some(9200);
        assert_eq!(config.metrics_bind_addr().port(), 9200);
    }

    #[test]
    fn test_validation_rejects_empty_queries() {
        let config = ExporterConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_duplicate_names() {
        let mut config = sample_config();
        config.queries.push(config.queries[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate query name"));
    }

    #[test]
    fn test_validation_rejects_schema_conflict() {
        let mut config = sample_config();
        config.queries.push(
            QuerySpec::bucketed("errors_by_level", "app_errors", "doc_count", json!({}))
                .with_label("level", "key"),
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("different labels"));
    }

    #[test]
    fn test_validation_allows_shared_metric_with_same_labels() {
        let mut config = sample_config();
        config.queries.push(
            QuerySpec::bucketed("warnings_by_host", "app_errors", "doc_count", json!({}))
                .with_label("host", "key"),
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_reserved_label() {
        let mut config = sample_config();
        config.queries[0] = config.queries[0].clone().with_label(QUERY_NAME_LABEL, "key");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_missing_body() {
        let mut config = sample_config();
        config.queries[0].query = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("query_file"));
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = sample_config();
        config.queries[0].interval_seconds = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_legacy_interval_keys() {
        let config: ExporterConfig = serde_json::from_value(json!({
            "elasticsearch": {"url": "http://es:9200"},
            "query_interval": 10,
            "queries": [{
                "name": "q",
                "type": "default",
                "query": {},
                "metric_name": "m",
                "value_path": "doc_count",
                "interval": 5
            }, {
                "name": "q2",
                "type": "raw",
                "query": {},
                "metric_name": "n"
            }]
        }))
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.default_interval(), Duration::from_secs(10));
        assert_eq!(
            config.queries[0].effective_interval(config.default_interval()),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.queries[1].effective_interval(config.default_interval()),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_validation_rejects_invalid_metric_name() {
        let mut config = sample_config();
        config.queries[0].metric_name = "app-errors".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid metric name"));

        config.queries[0].metric_name = "9lives".to_string();
        assert!(config.validate().is_err());

        config.queries[0].metric_name = "app:errors_total".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_reserved_metric_prefix() {
        let mut config = sample_config();
        config.queries[0].metric_name = "elastic_query_hits".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(RESERVED_METRIC_PREFIX));
    }

    #[test]
    fn test_validation_rejects_invalid_label_name() {
        for name in ["host-name", "1host", "__reserved", "host:name"] {
            let mut config = sample_config();
            config.queries[0].labels[0].name = name.to_string();
            assert!(config.validate().is_err(), "label {} accepted", name);
        }
    }

    #[test]
    fn test_raw_query_ignores_labels() {
        let spec = QuerySpec::raw("total", "total_docs", json!({})).with_label("host", "key");
        assert!(spec.label_names().is_empty());
        spec.validate().unwrap();
    }

    #[test]
    fn test_aggregation_key_default() {
        let mut spec = QuerySpec::bucketed("q", "m", "doc_count", json!({}));
        assert_eq!(spec.aggregation_key(), "0");
        spec.aggregation = Some("by_host".to_string());
        assert_eq!(spec.aggregation_key(), "by_host");
    }

    #[test]
    fn test_resolve_query_bodies() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("errors.json"),
            r#"{"size": 0, "aggs": {"0": {"terms": {"field": "host"}}}}"#,
        )
        .unwrap();

        let mut config = sample_config();
        config.queries[0].query = None;
        config.queries[0].query_file = Some(PathBuf::from("errors.json"));

        config.resolve_query_bodies(Some(temp_dir.path())).unwrap();
        config.validate().unwrap();
        assert_eq!(config.queries[0].query.as_ref().unwrap()["size"], json!(0));
    }

    #[test]
    fn test_resolve_query_bodies_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = sample_config();
        config.queries[0].query = None;
        config.queries[0].query_file = Some(PathBuf::from("missing.json"));

        let err = config.resolve_query_bodies(Some(temp_dir.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("missing.json"));
        assert!(err.to_string().contains("errors_by_host"));
    }

    #[test]
    fn test_resolve_query_bodies_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), "{\"size\": ").unwrap();
        let mut config = sample_config();
        config.queries[0].query = None;
        config.queries[0].query_file = Some(PathBuf::from("broken.json"));

        let err = config.resolve_query_bodies(Some(temp_dir.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Failed to parse query file"));
        assert!(err.to_string().contains("broken.json"));
    }
}
