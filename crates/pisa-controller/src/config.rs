//! Configuration for pisa-controller

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Resource API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Health probe and metrics endpoints
    #[serde(default)]
    pub probes: ProbesConfig,

    /// Reconciler and work queue tuning
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub leader_election: LeaderElectionConfig,

    /// External database provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// AWS credentials for the RDS provider
    #[serde(default)]
    pub aws: AwsConfig,

    /// Manifests loaded into the store at startup
    #[serde(default)]
    pub manifests: ManifestsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resource API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbesConfig {
    /// Address serving `/healthz` and `/readyz`
    pub health_probe_addr: SocketAddr,

    /// Address serving `/metrics`
    pub metrics_addr: SocketAddr,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            health_probe_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
        }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Number of concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay before re-checking an object that needs no action
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_secs: u64,

    /// First retry delay after a failed pass
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            recheck_interval_secs: default_recheck_interval(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl ReconcilerConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderElectionConfig {
    /// Only one controller reconciles at a time when enabled
    #[serde(default)]
    pub enabled: bool,

    /// Lease file shared by all candidates
    #[serde(default = "default_lease_path")]
    pub lease_path: PathBuf,

    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    #[serde(default = "default_renew_interval")]
    pub renew_interval_secs: u64,

    /// Candidate identity; a random one is generated when absent
    #[serde(default)]
    pub identity: Option<String>,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_path: default_lease_path(),
            lease_duration_secs: default_lease_duration(),
            renew_interval_secs: default_renew_interval(),
            identity: None,
        }
    }
}

/// External database provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderConfig {
    /// AWS RDS
    AwsRds,

    /// In-process provider for development. Instances become available after
    /// the given number of describe calls.
    Memory {
        #[serde(default = "default_ready_after")]
        ready_after_describes: u32,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::AwsRds
    }
}

/// AWS credentials. Unset fields fall back to `AWS_REGION`,
/// `AWS_ACCESS_KEY` and `AWS_SECRET_ACCESS_KEY`, then to the default chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl AwsConfig {
    fn fill_from_env(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if self.region.is_none() {
            self.region = env("AWS_REGION");
        }
        if self.access_key_id.is_none() {
            self.access_key_id = env("AWS_ACCESS_KEY");
        }
        if self.secret_access_key.is_none() {
            self.secret_access_key = env("AWS_SECRET_ACCESS_KEY");
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestsConfig {
    /// File or directory of YAML manifests
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_recheck_interval() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    1000
}

fn default_lease_path() -> PathBuf {
    std::env::temp_dir().join("pisa-controller.lease")
}

fn default_lease_duration() -> u64 {
    15
}

fn default_renew_interval() -> u64 {
    5
}

fn default_ready_after() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ControllerConfig {
    /// Load configuration: defaults, then the optional file, then `PISA_`
    /// environment variables (`PISA_RECONCILER__WORKERS=8`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ControllerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PISA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: ControllerConfig = builder.build()?.try_deserialize()?;
        config.aws.fill_from_env();
        Ok(config)
    }

    /// Configuration for local development: in-memory provider, no leader election
    pub fn development() -> Self {
        Self {
            provider: ProviderConfig::Memory {
                ready_after_describes: default_ready_after(),
            },
            ..Default::default()
        }
    }
}
