//! Turns search responses into metric observations
//!
//! A [`ResultWalker`] is selected from the query type. Bucketed queries yield
//! one observation per aggregation bucket; count-only queries yield a single
//! observation carrying the total hit count.

use crate::config::{QuerySpec, QueryType};
use crate::path::{resolve, resolve_f64, resolve_label, value_kind};
use crate::{Error, Result};
use serde_json::Value;

/// Key holding aggregation results in a search response
pub const AGGREGATIONS_KEY: &str = "aggregations";

/// Key holding the bucket sequence inside an aggregation
pub const BUCKETS_KEY: &str = "buckets";

/// Location of the total hit count (ES 7+ object form)
pub const TOTAL_HITS_PATH: &str = "hits.total.value";

/// Location of the total hit count (ES 6 scalar form)
pub const LEGACY_TOTAL_HITS_PATH: &str = "hits.total";

/// One extracted value with its label values
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedObservation {
    pub metric_name: String,
    pub query_name: String,
    /// Label values in the order of the query's label mappings
    pub label_values: Vec<String>,
    pub value: f64,
}

/// Response handling strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultWalker {
    /// Count-only: read the total hit count
    Raw,
    /// Walk `aggregations.<key>.buckets`
    Bucketed { aggregation: String },
}

impl ResultWalker {
    /// Select the walker for a query
    pub fn for_spec(spec: &QuerySpec) -> Self {
        match spec.query_type {
            QueryType::Raw => ResultWalker::Raw,
            QueryType::Bucketed => ResultWalker::Bucketed {
                aggregation: spec.aggregation_key().to_string(),
            },
        }
    }

    /// Start extracting observations from a response.
    ///
    /// Fails only for whole-response problems. Per-item failures are yielded
    /// as `Err` items and never end the iteration early.
    pub fn extract<'a>(&self, response: &'a Value, spec: &'a QuerySpec) -> Result<Observations<'a>> {
        if !response.is_object() {
            return Err(Error::malformed_response(format!(
                "expected a mapping for query {}, got {}",
                spec.name,
                value_kind(response)
            )));
        }

        let source = match self {
            ResultWalker::Raw => Source::Total(Some(response)),
            ResultWalker::Bucketed { aggregation } => {
                Source::Buckets(locate_buckets(response, aggregation)?.iter())
            }
        };

        Ok(Observations { spec, source })
    }
}

fn locate_buckets<'a>(response: &'a Value, aggregation: &str) -> Result<&'a Vec<Value>> {
    let aggregations = response
        .get(AGGREGATIONS_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| Error::missing_buckets(format!("response has no '{}'", AGGREGATIONS_KEY)))?;

    let buckets = aggregations
        .get(aggregation)
        .and_then(|agg| agg.get(BUCKETS_KEY))
        .ok_or_else(|| {
            Error::missing_buckets(format!(
                "aggregation '{}' has no '{}'",
                aggregation, BUCKETS_KEY
            ))
        })?;

    buckets.as_array().ok_or_else(|| {
        Error::missing_buckets(format!(
            "'{}' of aggregation '{}' is {}, expected array",
            BUCKETS_KEY,
            aggregation,
            value_kind(buckets)
        ))
    })
}

/// Total hit count of a response, if present
pub fn total_hits(response: &Value) -> Option<f64> {
    resolve_f64(response, TOTAL_HITS_PATH)
        .or_else(|_| resolve_f64(response, LEGACY_TOTAL_HITS_PATH))
        .ok()
}

enum Source<'a> {
    Buckets(std::slice::Iter<'a, Value>),
    Total(Option<&'a Value>),
}

/// Lazy, single-pass sequence of observations for one response
pub struct Observations<'a> {
    spec: &'a QuerySpec,
    source: Source<'a>,
}

impl<'a> Observations<'a> {
    fn observation(&self, label_values: Vec<String>, value: f64) -> ExtractedObservation {
        ExtractedObservation {
            metric_name: self.spec.metric_name.clone(),
            query_name: self.spec.name.clone(),
            label_values,
            value,
        }
    }

    fn from_bucket(&self, bucket: &Value) -> Result<ExtractedObservation> {
        let value = resolve_f64(bucket, &self.spec.value_path)?;
        let label_values = self
            .spec
            .published_labels()
            .iter()
            .map(|label| resolve_label(bucket, &label.path))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.observation(label_values, value))
    }

    fn from_total(&self, response: &Value) -> Result<ExtractedObservation> {
        let value = match resolve(response, LEGACY_TOTAL_HITS_PATH)? {
            total if total.is_object() => resolve_f64(response, TOTAL_HITS_PATH)?,
            _ => resolve_f64(response, LEGACY_TOTAL_HITS_PATH)?,
        };

        Ok(self.observation(Vec::new(), value))
    }
}

impl<'a> Iterator for Observations<'a> {
    type Item = Result<ExtractedObservation>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Buckets(buckets) => {
                let bucket = buckets.next()?;
                Some(self.from_bucket(bucket))
            }
            Source::Total(response) => {
                let response = response.take()?;
                Some(self.from_total(response))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.source {
            Source::Buckets(buckets) => buckets.size_hint(),
            Source::Total(response) => {
                let n = usize::from(response.is_some());
                (n, Some(n))
            }
        }
    }
}
