//! Per-query polling loop
//!
//! Each configured query gets its own [`QueryScheduler`], running as an
//! independent task. A cycle executes the query, walks the response and
//! publishes every extracted observation; the next cycle starts one interval
//! after the previous one completed.

use crate::{AgentError, Result};
use chrono::{DateTime, Utc};
use esq_core::{total_hits, QuerySpec, ResultWalker};
use esq_metrics::{MetricRegistry, MetricsError};
use esq_search::{SearchClient, SearchRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Observable state of one scheduler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerState {
    pub last_run_at: Option<DateTime<Utc>>,
    /// Search duration of the last successful execution
    pub last_duration_millis: Option<u64>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub failures: u64,
}

/// Result of a single cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The response was walked; `dropped` items failed path resolution
    Published { observed: usize, dropped: usize },
    /// The cycle was abandoned
    Failed { kind: &'static str, message: String },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Published { .. })
    }
}

/// Polls one query on a fixed delay
pub struct QueryScheduler {
    spec: QuerySpec,
    request: SearchRequest,
    walker: ResultWalker,
    label_names: Vec<String>,
    interval: Duration,
    client: Arc<dyn SearchClient>,
    registry: MetricRegistry,
    state: Arc<RwLock<SchedulerState>>,
}

impl QueryScheduler {
    /// Create a scheduler for `spec`.
    ///
    /// The effective interval is the query's own, falling back to
    /// `default_interval`, and is fixed for the scheduler's lifetime.
    pub fn new(
        spec: QuerySpec,
        client: Arc<dyn SearchClient>,
        registry: MetricRegistry,
        default_interval: Duration,
    ) -> Result<Self> {
        let body = spec.query.clone().ok_or_else(|| {
            AgentError::Config(format!("Query {} has no resolved query body", spec.name))
        })?;

        let interval = spec.effective_interval(default_interval);
        if interval.is_zero() {
            return Err(AgentError::Config(format!(
                "Query {} has a zero interval",
                spec.name
            )));
        }

        Ok(Self {
            request: SearchRequest::new(body).with_index(spec.index.clone()),
            walker: ResultWalker::for_spec(&spec),
            label_names: spec.label_names(),
            interval,
            client,
            registry,
            state: Arc::new(RwLock::new(SchedulerState::default())),
            spec,
        })
    }

    /// Query name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Effective polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Shared handle to the scheduler state
    pub fn state_handle(&self) -> Arc<RwLock<SchedulerState>> {
        self.state.clone()
    }

    /// Snapshot of the scheduler state
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped.
    ///
    /// Shutdown is observed between cycles; an in-flight search is not
    /// interrupted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting scheduler for query {} every {:?}",
            self.spec.name, self.interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_once().await;

            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Scheduler for query {} stopped", self.spec.name);
    }

    /// Execute one cycle
    pub async fn run_once(&self) -> CycleOutcome {
        let name = self.spec.name.as_str();
        let metrics = self.registry.query_metrics();

        self.state.write().await.last_run_at = Some(Utc::now());
        debug!("Executing query {}", name);

        let started = Instant::now();
        let response = match self.client.execute(&self.request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Query {} failed: {}", name, e);
                metrics.record_error(name, e.category());
                return self.fail(e.category(), e.to_string()).await;
            }
        };
        let elapsed = started.elapsed();

        metrics.record_duration(name, elapsed.as_secs_f64() * 1000.0);
        {
            let mut state = self.state.write().await;
            state.last_duration_millis = Some(elapsed.as_millis() as u64);
        }
        debug!("Query {} completed in {:?}", name, elapsed);

        let observations = match self.walker.extract(&response, &self.spec) {
            Ok(observations) => observations,
            Err(e) => {
                error!("Failed to process response for query {}: {}", name, e);
                metrics.record_error(name, e.category());
                return self.fail(e.category(), e.to_string()).await;
            }
        };

        let mut observed = 0;
        let mut dropped: u64 = 0;
        for item in observations {
            let observation = match item {
                Ok(observation) => observation,
                Err(e) => {
                    warn!("Dropping item from query {}: {}", name, e);
                    dropped += 1;
                    continue;
                }
            };

            if let Err(e) = self.registry.observe_extracted(&observation, &self.label_names) {
                match &e {
                    MetricsError::SchemaConflict { .. } => {
                        error!("Query {} cannot publish {}: {}", name, observation.metric_name, e)
                    }
                    _ => error!("Failed to publish {} for query {}: {}", observation.metric_name, name, e),
                }
                metrics.record_error(name, e.category());
                metrics.record_dropped(name, dropped);
                return self.fail(e.category(), e.to_string()).await;
            }
            observed += 1;
        }

        metrics.record_dropped(name, dropped);
        metrics.record_success(name, total_hits(&response));
        {
            let mut state = self.state.write().await;
            state.last_error = None;
            state.runs += 1;
        }

        debug!(
            "Query {} published {} observations ({} dropped)",
            name, observed, dropped
        );
        CycleOutcome::Published {
            observed,
            dropped: dropped as usize,
        }
    }

    async fn fail(&self, kind: &'static str, message: String) -> CycleOutcome {
        let mut state = self.state.write().await;
        state.last_error = Some(message.clone());
        state.runs += 1;
        state.failures += 1;
        CycleOutcome::Failed { kind, message }
    }
}

/// Sleep for `interval`; returns true if shutdown was requested meanwhile
async fn wait_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}
