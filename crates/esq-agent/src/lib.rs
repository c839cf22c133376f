//! # esq-agent
//!
//! Exporter daemon for esq-exporter.
//!
//! This crate runs one [`QueryScheduler`] task per configured query, publishes
//! what they extract through the shared metric registry, and owns the process
//! lifecycle: logging setup, the metrics endpoint, and signal handling.

pub mod agent;
pub mod config;
pub mod scheduler;

// Re-export commonly used types
pub use agent::{Agent, AgentBuilder};
pub use config::{AgentConfig, LoggingConfig};
pub use scheduler::{CycleOutcome, QueryScheduler, SchedulerState};

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] esq_core::Error),

    #[error("Search client error: {0}")]
    Search(#[from] esq_search::SearchError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] esq_metrics::MetricsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Environment toggle that raises the default log level to `debug`
pub const DEBUG_ENV: &str = "DEBUG";

/// Initialize logging and build the agent
pub async fn init_agent(config: &AgentConfig) -> Result<Agent> {
    init_logging(&config.logging)?;

    tracing::info!(
        "Initializing exporter with {} queries against {}",
        config.exporter.queries.len(),
        config.exporter.elasticsearch.url
    );

    AgentBuilder::new().with_config(config.clone()).build().await
}

/// Initialize logging and tracing
pub fn init_logging(logging_config: &LoggingConfig) -> Result<()> {
    let level = effective_level(logging_config, std::env::var(DEBUG_ENV).ok().as_deref());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging_config.show_target)
        .with_thread_ids(logging_config.show_thread_ids)
        .with_line_number(logging_config.show_line_numbers);

    let result = match logging_config.format.as_str() {
        "json" => subscriber.json().try_init(),
        _ => subscriber.try_init(),
    };

    result.map_err(|e| AgentError::Config(format!("Failed to initialize logging: {}", e)))
}

/// Level used when `RUST_LOG` is unset
fn effective_level<'a>(logging_config: &'a LoggingConfig, debug_env: Option<&str>) -> &'a str {
    match debug_env {
        Some(value) if value.eq_ignore_ascii_case("true") => "debug",
        _ => &logging_config.level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_toggle() {
        let config = LoggingConfig::default();
        assert_eq!(effective_level(&config, None), "info");
        assert_eq!(effective_level(&config, Some("true")), "debug");
        assert_eq!(effective_level(&config, Some("TRUE")), "debug");
        assert_eq!(effective_level(&config, Some("false")), "info");
    }

    #[test]
    fn test_error_conversions() {
        let err: AgentError = esq_core::Error::config("bad").into();
        assert!(err.to_string().contains("bad"));

        let err: AgentError = esq_search::SearchError::Decode("oops".to_string()).into();
        assert!(matches!(err, AgentError::Search(_)));
    }
}
