//! Server setup and lifecycle management

use crate::api::rest::state::AppState;
use crate::api::{create_metrics_router, create_probe_router, create_router};
use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::credentials::RandomPasswordGenerator;
use crate::error::{ControllerError, ControllerResult};
use crate::leader::{leader_election_task, LeaseLock};
use crate::provider::build_provider;
use crate::reconciler::Reconciler;
use crate::store::{load_manifests, InMemoryStore, Store};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pisa_types::CodecTable;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// pisa-controller process
pub struct Server {
    config: ControllerConfig,
    codecs: Arc<CodecTable>,
    store: Arc<dyn Store>,
    controller: Arc<Controller>,
    metrics: Option<PrometheusHandle>,
}

impl Server {
    /// Build the store, seed it from manifests and connect the provider
    pub async fn new(config: ControllerConfig) -> ControllerResult<Self> {
        let codecs = Arc::new(CodecTable::standard());
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(codecs.clone()));

        if let Some(path) = &config.manifests.path {
            let count = load_manifests(store.as_ref(), &codecs, path).await?;
            tracing::info!(count, path = %path.display(), "Seeded store from manifests");
        }

        let provider = build_provider(&config).await?;
        tracing::info!(provider = provider.name(), "Database provider ready");

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            provider,
            Arc::new(RandomPasswordGenerator::default()),
            config.reconciler.recheck_interval(),
        ));
        let controller = Arc::new(Controller::new(
            store.clone(),
            reconciler,
            config.reconciler.clone(),
        ));

        Ok(Self {
            config,
            codecs,
            store,
            controller,
            metrics: None,
        })
    }

    /// Install the process-wide Prometheus recorder served at `/metrics`
    pub fn with_metrics_recorder(mut self) -> ControllerResult<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ControllerError::Server(format!("failed to install metrics recorder: {}", e)))?;
        self.metrics = Some(handle);
        Ok(self)
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Run until SIGINT / SIGTERM
    pub async fn run(self) -> ControllerResult<()> {
        let shutdown = CancellationToken::new();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        });

        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled
    pub async fn run_until(self, shutdown: CancellationToken) -> ControllerResult<()> {
        let state = AppState::new(
            self.store.clone(),
            self.codecs.clone(),
            self.controller.readiness(),
            self.metrics.clone(),
        );

        let servers = vec![
            serve(
                "Resource API",
                self.config.server.listen_addr,
                create_router(state.clone(), self.config.server.enable_cors),
                shutdown.clone(),
            )
            .await?,
            serve(
                "Health probes",
                self.config.probes.health_probe_addr,
                create_probe_router(state.clone()),
                shutdown.clone(),
            )
            .await?,
            serve(
                "Metrics",
                self.config.probes.metrics_addr,
                create_metrics_router(state),
                shutdown.clone(),
            )
            .await?,
        ];

        let election = &self.config.leader_election;
        let (leader_tx, leader_rx) = watch::channel(!election.enabled);
        let election_task = if election.enabled {
            let lock = LeaseLock::from_config(election);
            tracing::info!(
                identity = lock.identity(),
                lease = %lock.path().display(),
                "Leader election enabled"
            );
            Some(tokio::spawn(leader_election_task(
                lock,
                Duration::from_secs(election.renew_interval_secs),
                leader_tx,
                shutdown.clone(),
            )))
        } else {
            // `leader_tx` stays alive until return: always leader
            None
        };

        let result = self
            .controller
            .clone()
            .run_with_leadership(leader_rx, shutdown.clone())
            .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Controller failed");
        }
        tracing::info!("pisa-controller shutting down");
        shutdown.cancel();

        if let Some(task) = election_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Leader election task panicked");
            }
        }
        for server in servers {
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Server task panicked");
            }
        }

        result
    }
}

async fn serve(
    name: &'static str,
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> ControllerResult<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Server(format!("{} failed to bind {}: {}", name, addr, e)))?;

    tracing::info!("{} listening on {}", name, addr);

    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "{} server failed", name);
        }
    }))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
