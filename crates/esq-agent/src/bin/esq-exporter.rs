//! Main binary for the exporter daemon (esq-exporter)

use anyhow::Context;
use clap::{Parser, Subcommand};
use esq_agent::{init_agent, AgentConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "/app/config/config.json";

#[derive(Parser)]
#[command(name = "esq-exporter")]
#[command(about = "Publishes Elasticsearch query results as Prometheus metrics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ESQ_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overriding the configuration file
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Metrics listener address, overriding the configuration file
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the exporter
    Run,
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print an example configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { ref config }) => {
            validate_config(config.as_deref().unwrap_or(&cli.config))
        }
        Some(Commands::Config) => {
            print!("{}", AgentConfig::example().to_yaml()?);
            Ok(())
        }
        Some(Commands::Run) | None => run_exporter(&cli).await,
    }
}

async fn run_exporter(cli: &Cli) -> anyhow::Result<()> {
    let mut config = AgentConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    if let Some(bind) = cli.bind {
        config.exporter.metrics.bind_addr = bind;
        config.exporter.prometheus_port = None;
    }

    let mut agent = init_agent(&config)
        .await
        .context("Failed to initialize exporter")?;

    info!("Loaded configuration from {}", cli.config.display());

    if let Err(e) = agent.run().await {
        error!("Exporter failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

fn validate_config(path: &Path) -> anyhow::Result<()> {
    let config = AgentConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Configuration is invalid")?;

    println!("Configuration {} is valid", path.display());
    println!("  Elasticsearch: {}", config.exporter.elasticsearch.url);
    println!("  Metrics:       {}", config.exporter.metrics_bind_addr());
    println!("  Queries:");
    let default_interval = config.exporter.default_interval();
    for spec in &config.exporter.queries {
        println!(
            "    {} ({:?}) -> {} every {:?}",
            spec.name,
            spec.query_type,
            spec.metric_name,
            spec.effective_interval(default_interval)
        );
    }

    Ok(())
}
