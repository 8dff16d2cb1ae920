//! Application state for API handlers

use crate::store::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use pisa_types::CodecTable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Desired-state store
    pub store: Arc<dyn Store>,

    /// Manifest encoding
    pub codecs: Arc<CodecTable>,

    /// Set once the controller finished its initial sync
    pub readiness: Arc<AtomicBool>,

    /// Prometheus exposition; absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,

    pub version: String,

    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        codecs: Arc<CodecTable>,
        readiness: Arc<AtomicBool>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            store,
            codecs,
            readiness,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.load(Ordering::SeqCst)
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
