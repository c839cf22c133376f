//! Exporter lifecycle

use crate::scheduler::{QueryScheduler, SchedulerState};
use crate::{config::AgentConfig, Result};
use esq_metrics::{MetricRegistry, MetricsEndpoint};
use esq_search::{ElasticsearchClient, SearchClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long a scheduler may take to reach its sleep boundary after shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The exporter: one scheduler task per query plus the metrics endpoint
pub struct Agent {
    config: AgentConfig,
    registry: MetricRegistry,
    client: Arc<dyn SearchClient>,
    endpoint: Option<MetricsEndpoint>,
    schedulers: Vec<SchedulerHandle>,
    shutdown_tx: watch::Sender<bool>,
}

/// Handle to a running scheduler task
struct SchedulerHandle {
    name: String,
    state: Arc<RwLock<SchedulerState>>,
    handle: JoinHandle<()>,
}

impl Agent {
    pub(crate) fn new(config: AgentConfig, registry: MetricRegistry, client: Arc<dyn SearchClient>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry,
            client,
            endpoint: None,
            schedulers: Vec::new(),
            shutdown_tx,
        }
    }

    /// Start the metrics endpoint and one scheduler per query
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Starting exporter with {} queries",
            self.config.exporter.queries.len()
        );

        // Reset the signal in case of a restart
        self.shutdown_tx.send_replace(false);

        if self.config.exporter.metrics.enabled {
            let mut endpoint =
                MetricsEndpoint::new(self.registry.clone(), self.config.exporter.metrics_bind_addr());
            endpoint.start().await?;
            info!("Serving metrics at {}", endpoint.metrics_url());
            self.endpoint = Some(endpoint);
        }

        let default_interval = self.config.exporter.default_interval();
        let mut schedulers = Vec::with_capacity(self.config.exporter.queries.len());
        for spec in &self.config.exporter.queries {
            schedulers.push(QueryScheduler::new(
                spec.clone(),
                self.client.clone(),
                self.registry.clone(),
                default_interval,
            )?);
        }

        for scheduler in schedulers {
            let name = scheduler.name().to_string();
            let state = scheduler.state_handle();
            let handle = tokio::spawn(scheduler.run(self.shutdown_tx.subscribe()));
            self.schedulers.push(SchedulerHandle { name, state, handle });
        }

        info!("Exporter started with {} schedulers", self.schedulers.len());
        Ok(())
    }

    /// Signal shutdown and wait for every scheduler to stop
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping exporter");

        self.shutdown_tx.send_replace(true);

        for mut scheduler in self.schedulers.drain(..) {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut scheduler.handle).await {
                Ok(Ok(())) => {
                    info!("Scheduler {} stopped", scheduler.name);
                }
                Ok(Err(e)) => {
                    error!("Scheduler {} failed: {}", scheduler.name, e);
                }
                Err(_) => {
                    warn!(
                        "Scheduler {} did not stop within {:?}, aborting",
                        scheduler.name, SHUTDOWN_TIMEOUT
                    );
                    scheduler.handle.abort();
                }
            }
        }

        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.stop().await;
        }

        info!("Exporter stopped");
        Ok(())
    }

    /// Run the exporter until a shutdown signal is received
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
            _ = wait_for_termination() => {
                info!("Received termination signal");
            }
        }

        self.stop().await
    }

    /// Get the agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get the metric registry
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Address the metrics endpoint listens on, if running
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().and_then(MetricsEndpoint::local_addr)
    }

    /// Whether scheduler tasks are running
    pub fn is_running(&self) -> bool {
        !self.schedulers.is_empty()
    }

    /// Snapshot of every scheduler's state, by query name
    pub async fn scheduler_states(&self) -> Vec<(String, SchedulerState)> {
        let mut states = Vec::with_capacity(self.schedulers.len());
        for scheduler in &self.schedulers {
            states.push((scheduler.name.clone(), scheduler.state.read().await.clone()));
        }
        states
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for scheduler in &self.schedulers {
            scheduler.handle.abort();
        }
    }
}

/// Wait for SIGTERM
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Wait for termination signals (Windows)
#[cfg(not(unix))]
async fn wait_for_termination() {
    std::future::pending::<()>().await;
}

/// Builder for creating agents
pub struct AgentBuilder {
    config: Option<AgentConfig>,
    client: Option<Arc<dyn SearchClient>>,
}

impl AgentBuilder {
    /// Create a new agent builder
    pub fn new() -> Self {
        Self {
            config: None,
            client: None,
        }
    }

    /// Set the agent configuration
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use the given search client instead of connecting to Elasticsearch
    pub fn with_search_client(mut self, client: Arc<dyn SearchClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the agent.
    ///
    /// Fails on invalid configuration or when the search client cannot be
    /// constructed, e.g. because the CA bundle is unreadable.
    pub async fn build(self) -> Result<Agent> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = MetricRegistry::new()?;

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(ElasticsearchClient::new(&config.exporter.elasticsearch)?),
        };

        Ok(Agent::new(config, registry, client))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentError;
    use esq_core::QuerySpec;
    use esq_search::MockSearchClient;
    use serde_json::json;

    fn test_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.exporter.metrics.bind_addr = "127.0.0.1:0".parse().unwrap();
        config.exporter.queries = vec![
            QuerySpec::bucketed("errors_by_host", "app_errors", "doc_count", json!({"size": 0}))
                .with_label("host", "key"),
            QuerySpec::raw("all_logs", "log_count", json!({})),
        ];
        config
    }

    fn mock_client() -> Arc<MockSearchClient> {
        Arc::new(MockSearchClient::always(json!({
            "hits": {"total": {"value": 9}},
            "aggregations": {"0": {"buckets": [{"key": "web-1", "doc_count": 9}]}}
        })))
    }

    async fn wait_for_runs(agent: &Agent, expected: usize) {
        for _ in 0..100 {
            let states = agent.scheduler_states().await;
            if states.iter().filter(|(_, state)| state.runs > 0).count() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("schedulers did not run");
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = AgentBuilder::new()
            .with_config(AgentConfig::default())
            .with_search_client(mock_client())
            .build()
            .await;
        assert!(matches!(result, Err(AgentError::Core(_))));
    }

    #[tokio::test]
    async fn test_build_with_elasticsearch_client() {
        let agent = AgentBuilder::new().with_config(test_config()).build().await.unwrap();
        assert!(!agent.is_running());
        assert_eq!(agent.config().exporter.queries.len(), 2);
    }

    #[tokio::test]
    async fn test_build_fails_on_unreadable_ca() {
        let mut config = test_config();
        config.exporter.elasticsearch.ca_cert_path = Some("/nonexistent/ca.pem".into());

        let result = AgentBuilder::new().with_config(config).build().await;
        assert!(matches!(result, Err(AgentError::Search(_))));
    }

    #[tokio::test]
    async fn test_start_publish_stop() {
        let client = mock_client();
        let mut agent = AgentBuilder::new()
            .with_config(test_config())
            .with_search_client(client.clone())
            .build()
            .await
            .unwrap();

        agent.start().await.unwrap();
        assert!(agent.is_running());
        assert!(agent.metrics_addr().is_some());

        wait_for_runs(&agent, 2).await;

        let text = agent.registry().export_text().unwrap();
        assert!(text.contains(r#"app_errors{host="web-1",query_name="errors_by_host"} 9"#));
        assert!(text.contains(r#"log_count{query_name="all_logs"} 9"#));

        agent.stop().await.unwrap();
        assert!(!agent.is_running());
        assert!(agent.metrics_addr().is_none());

        // Stopped schedulers issue no further searches
        let calls = client.call_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.call_count(), calls);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_disabled() {
        let mut config = test_config();
        config.exporter.metrics.enabled = false;

        let mut agent = AgentBuilder::new()
            .with_config(config)
            .with_search_client(mock_client())
            .build()
            .await
            .unwrap();

        agent.start().await.unwrap();
        assert!(agent.metrics_addr().is_none());
        assert!(agent.is_running());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_query_does_not_affect_others() {
        let mut config = test_config();
        config.exporter.metrics.enabled = false;
        // Bucketed query against a count-only response: every cycle fails
        config.exporter.queries[0].aggregation = Some("missing".to_string());

        let mut agent = AgentBuilder::new()
            .with_config(config)
            .with_search_client(mock_client())
            .build()
            .await
            .unwrap();

        agent.start().await.unwrap();
        wait_for_runs(&agent, 2).await;

        let states = agent.scheduler_states().await;
        let errors = &states.iter().find(|(name, _)| name == "errors_by_host").unwrap().1;
        let logs = &states.iter().find(|(name, _)| name == "all_logs").unwrap().1;
        assert_eq!(errors.failures, 1);
        assert!(errors.last_error.is_some());
        assert_eq!(logs.failures, 0);
        assert!(agent.registry().series("log_count").is_some());

        agent.stop().await.unwrap();
    }
}
