//! Metric registry with run-time label schemas
//!
//! Gauge families are created lazily the first time a metric name is observed
//! and reused afterwards. Every family's label schema is `query_name` followed
//! by the label names of the query that created it; later observations must
//! supply exactly the same names in the same order.

use crate::{common::QueryMetrics, MetricsError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use esq_core::{ExtractedObservation, QUERY_NAME_LABEL};
use prometheus::{Encoder, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use tracing::{debug, info};

/// A gauge family and its label schema
#[derive(Debug, Clone)]
pub struct MetricSeries {
    name: String,
    label_schema: Vec<String>,
    gauge: GaugeVec,
}

impl MetricSeries {
    fn new(name: &str, label_names: &[String], help: &str) -> Result<Self> {
        let mut label_schema = Vec::with_capacity(label_names.len() + 1);
        label_schema.push(QUERY_NAME_LABEL.to_string());
        label_schema.extend(label_names.iter().cloned());

        let schema_refs: Vec<&str> = label_schema.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(prometheus::Opts::new(name, help), &schema_refs)
            .map_err(|e| MetricsError::Registry(format!("Failed to create gauge {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            label_schema,
            gauge,
        })
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full label schema, starting with `query_name`
    pub fn label_schema(&self) -> &[String] {
        &self.label_schema
    }

    /// Underlying gauge family
    pub fn gauge(&self) -> &GaugeVec {
        &self.gauge
    }

    fn matches(&self, label_names: &[String]) -> bool {
        self.label_schema[1..] == *label_names
    }
}

/// Process-wide table of dynamic gauge families
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    inner: Arc<MetricRegistryInner>,
}

#[derive(Debug)]
struct MetricRegistryInner {
    registry: Registry,
    series: DashMap<String, MetricSeries>,
    query_metrics: QueryMetrics,
}

impl MetricRegistry {
    /// Create a registry with the self-observability metrics registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let query_metrics = QueryMetrics::new()
            .map_err(|e| MetricsError::Registry(format!("Failed to create query metrics: {}", e)))?;
        query_metrics
            .register(&registry)
            .map_err(|e| MetricsError::Registry(format!("Failed to register query metrics: {}", e)))?;

        Ok(Self {
            inner: Arc::new(MetricRegistryInner {
                registry,
                series: DashMap::new(),
                query_metrics,
            }),
        })
    }

    /// Self-observability metrics
    pub fn query_metrics(&self) -> &QueryMetrics {
        &self.inner.query_metrics
    }

    /// Underlying Prometheus registry
    pub fn prometheus(&self) -> &Registry {
        &self.inner.registry
    }

    /// Look up the series for `metric_name`, creating it if absent.
    ///
    /// Creation happens while the entry is locked, so concurrent callers for
    /// the same name observe exactly one series. An existing series whose
    /// schema differs from `label_names` yields [`MetricsError::SchemaConflict`].
    pub fn register(&self, metric_name: &str, label_names: &[String], help: &str) -> Result<MetricSeries> {
        match self.inner.series.entry(metric_name.to_string()) {
            Entry::Occupied(entry) => {
                let series = entry.get();
                if !series.matches(label_names) {
                    return Err(MetricsError::SchemaConflict {
                        metric: metric_name.to_string(),
                        expected: series.label_schema[1..].to_vec(),
                        found: label_names.to_vec(),
                    });
                }
                Ok(series.clone())
            }
            Entry::Vacant(entry) => {
                let series = MetricSeries::new(metric_name, label_names, help)?;
                self.inner
                    .registry
                    .register(Box::new(series.gauge.clone()))
                    .map_err(|e| {
                        MetricsError::Registry(format!("Failed to register {}: {}", metric_name, e))
                    })?;

                info!(
                    "Registered metric {} with labels {:?}",
                    metric_name, series.label_schema
                );
                entry.insert(series.clone());
                Ok(series)
            }
        }
    }

    /// Set the value of one label combination, registering the metric on first use.
    ///
    /// The combination is `[query_name] ++ label_values`; other combinations
    /// keep their last value.
    pub fn observe(
        &self,
        metric_name: &str,
        query_name: &str,
        label_names: &[String],
        label_values: &[String],
        value: f64,
    ) -> Result<()> {
        let series = self.register(
            metric_name,
            label_names,
            &format!("Metric for query {}", query_name),
        )?;

        let mut values: Vec<&str> = Vec::with_capacity(label_values.len() + 1);
        values.push(query_name);
        values.extend(label_values.iter().map(String::as_str));

        let gauge = series.gauge.get_metric_with_label_values(&values).map_err(|e| {
            MetricsError::Registry(format!("Invalid label values for {}: {}", metric_name, e))
        })?;
        gauge.set(value);

        debug!("Set {}{:?} = {}", metric_name, values, value);
        Ok(())
    }

    /// Publish an extracted observation
    pub fn observe_extracted(&self, observation: &ExtractedObservation, label_names: &[String]) -> Result<()> {
        self.observe(
            &observation.metric_name,
            &observation.query_name,
            label_names,
            &observation.label_values,
            observation.value,
        )
    }

    /// Look up a registered series
    pub fn series(&self, metric_name: &str) -> Option<MetricSeries> {
        self.inner.series.get(metric_name).map(|entry| entry.value().clone())
    }

    /// Label schema of a registered series
    pub fn label_schema(&self, metric_name: &str) -> Option<Vec<String>> {
        self.inner
            .series
            .get(metric_name)
            .map(|entry| entry.label_schema.clone())
    }

    /// Number of dynamic series families
    pub fn series_count(&self) -> usize {
        self.inner.series.len()
    }

    /// Collect all metric families, dynamic and self-observability
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.inner.registry.gather()
    }

    /// Export all metrics in the Prometheus text format
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::Export(format!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer)
            .map_err(|e| MetricsError::Export(format!("Failed to convert metrics to string: {}", e)))
    }
}
