//! Self-observability metrics for query execution

use esq_core::QUERY_NAME_LABEL;
use prometheus::{CounterVec, GaugeVec};

/// Metrics the exporter records about its own queries
#[derive(Debug, Clone)]
pub struct QueryMetrics {
    /// Total hit count reported by the last successful response
    pub hits: GaugeVec,

    /// Execution time of the last successful search in milliseconds
    pub duration_milliseconds: GaugeVec,

    /// Failed cycles and dropped registrations, by error kind
    pub errors_total: CounterVec,

    /// Buckets/hits dropped because a path did not resolve
    pub dropped_items_total: CounterVec,

    /// Unix time of the last successful search
    pub last_success_timestamp_seconds: GaugeVec,
}

impl QueryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            hits: GaugeVec::new(
                prometheus::Opts::new("elastic_query_hits", "Number of documents matching the query"),
                &[QUERY_NAME_LABEL],
            )?,
            duration_milliseconds: GaugeVec::new(
                prometheus::Opts::new(
                    "elastic_query_duration_milliseconds",
                    "Query execution time in milliseconds",
                ),
                &[QUERY_NAME_LABEL],
            )?,
            errors_total: CounterVec::new(
                prometheus::Opts::new("elastic_query_errors_total", "Total failed query cycles by kind"),
                &[QUERY_NAME_LABEL, "kind"],
            )?,
            dropped_items_total: CounterVec::new(
                prometheus::Opts::new(
                    "elastic_query_dropped_items_total",
                    "Total buckets or hits dropped during extraction",
                ),
                &[QUERY_NAME_LABEL],
            )?,
            last_success_timestamp_seconds: GaugeVec::new(
                prometheus::Opts::new(
                    "elastic_query_last_success_timestamp_seconds",
                    "Unix timestamp of the last successful query execution",
                ),
                &[QUERY_NAME_LABEL],
            )?,
        })
    }

    /// Register all metrics with the given registry
    pub fn register(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.duration_milliseconds.clone()))?;
        registry.register(Box::new(self.errors_total.clone()))?;
        registry.register(Box::new(self.dropped_items_total.clone()))?;
        registry.register(Box::new(self.last_success_timestamp_seconds.clone()))?;
        Ok(())
    }

    /// Record the execution time of a search that returned a response
    pub fn record_duration(&self, query_name: &str, duration_ms: f64) {
        self.duration_milliseconds
            .with_label_values(&[query_name])
            .set(duration_ms);
    }

    /// Record a fully processed cycle
    pub fn record_success(&self, query_name: &str, hits: Option<f64>) {
        let labels = [query_name];

        if let Some(hits) = hits {
            self.hits.with_label_values(&labels).set(hits);
        }
        self.last_success_timestamp_seconds
            .with_label_values(&labels)
            .set(chrono::Utc::now().timestamp() as f64);
    }

    /// Record a failed cycle
    pub fn record_error(&self, query_name: &str, kind: &str) {
        self.errors_total.with_label_values(&[query_name, kind]).inc();
    }

    /// Record items dropped during extraction
    pub fn record_dropped(&self, query_name: &str, count: u64) {
        if count > 0 {
            self.dropped_items_total
                .with_label_values(&[query_name])
                .inc_by(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_success() {
        let metrics = QueryMetrics::new().unwrap();
        metrics.record_duration("q1", 15.0);
        metrics.record_success("q1", Some(42.0));

        assert_eq!(metrics.hits.with_label_values(&["q1"]).get(), 42.0);
        assert_eq!(metrics.duration_milliseconds.with_label_values(&["q1"]).get(), 15.0);
        assert!(metrics.last_success_timestamp_seconds.with_label_values(&["q1"]).get() > 0.0);
    }

    #[test]
    fn test_duration_alone_is_not_success() {
        let metrics = QueryMetrics::new().unwrap();
        metrics.record_duration("q1", 3.0);

        assert_eq!(metrics.duration_milliseconds.with_label_values(&["q1"]).get(), 3.0);
        assert_eq!(metrics.last_success_timestamp_seconds.with_label_values(&["q1"]).get(), 0.0);
    }

    #[test]
    fn test_record_success_without_hits_keeps_previous() {
        let metrics = QueryMetrics::new().unwrap();
        metrics.record_success("q1", Some(7.0));
        metrics.record_success("q1", None);

        assert_eq!(metrics.hits.with_label_values(&["q1"]).get(), 7.0);
    }

    #[test]
    fn test_record_error_and_dropped() {
        let metrics = QueryMetrics::new().unwrap();
        metrics.record_error("q1", "transport");
        metrics.record_error("q1", "transport");
        metrics.record_dropped("q1", 3);
        metrics.record_dropped("q1", 0);

        assert_eq!(metrics.errors_total.with_label_values(&["q1", "transport"]).get(), 2.0);
        assert_eq!(metrics.dropped_items_total.with_label_values(&["q1"]).get(), 3.0);
    }

    #[test]
    fn test_register() {
        let registry = prometheus::Registry::new();
        let metrics = QueryMetrics::new().unwrap();
        metrics.register(&registry).unwrap();

        // A second registration of the same collectors must fail
        assert!(metrics.register(&registry).is_err());
    }
}
