//! pisa-controller - VirtualDatabase reconciliation service
//!
//! Watches VirtualDatabases, provisions a managed database instance for each
//! one backed by an AWS RDS DatabaseClass, and publishes its connection
//! details as a DatabaseEndpoint.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use pisa_controller::config::{ControllerConfig, ProviderConfig};
use pisa_controller::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderKind {
    AwsRds,
    Memory,
}

/// pisa-controller CLI
#[derive(Parser)]
#[command(name = "pisa-controller")]
#[command(about = "Reconciles VirtualDatabases into managed database instances", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PISA_CONFIG")]
    config: Option<String>,

    /// Resource API listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Address the metric endpoint binds to
    #[arg(long)]
    metrics_bind_address: Option<SocketAddr>,

    /// Address the probe endpoint binds to
    #[arg(long)]
    health_probe_bind_address: Option<SocketAddr>,

    /// Enable leader election; only one active controller reconciles at a time
    #[arg(long)]
    leader_elect: bool,

    /// Manifest file or directory loaded into the store at startup
    #[arg(short, long)]
    manifests: Option<PathBuf>,

    /// Database provider
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,

    /// Log level
    #[arg(long, env = "PISA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "PISA_LOG_JSON")]
    json: bool,
}

impl Cli {
    /// CLI flags take precedence over file and environment
    fn apply(self, config: &mut ControllerConfig) {
        if let Some(addr) = self.listen {
            config.server.listen_addr = addr;
        }
        if let Some(addr) = self.metrics_bind_address {
            config.probes.metrics_addr = addr;
        }
        if let Some(addr) = self.health_probe_bind_address {
            config.probes.health_probe_addr = addr;
        }
        if self.leader_elect {
            config.leader_election.enabled = true;
        }
        if let Some(path) = self.manifests {
            config.manifests.path = Some(path);
        }
        match self.provider {
            Some(ProviderKind::AwsRds) => config.provider = ProviderConfig::AwsRds,
            Some(ProviderKind::Memory) if !matches!(config.provider, ProviderConfig::Memory { .. }) => {
                config.provider = ControllerConfig::development().provider;
            }
            _ => {}
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json {
            config.logging.json = true;
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        ControllerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    init_tracing(&config.logging.level, config.logging.json);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        probes = %config.probes.health_probe_addr,
        metrics = %config.probes.metrics_addr,
        leader_election = config.leader_election.enabled,
        "Starting pisa-controller"
    );

    let server = Server::new(config)
        .await
        .context("failed to start controller")?
        .with_metrics_recorder()?;
    server.run().await?;

    Ok(())
}
