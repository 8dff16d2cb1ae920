//! pisa-controller library
//!
//! Reconciles `VirtualDatabase` objects against a managed database provider:
//! - Desired-state store with change notifications and an owner index
//! - Reconciliation engine provisioning AWS RDS instances
//! - Work queue and worker pool with per-key backoff
//! - Leader election, health probes, metrics and a resource API

pub mod api;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod leader;
pub mod provider;
pub mod queue;
pub mod reconciler;
pub mod server;
pub mod store;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{ApiError, ControllerError, ProviderError, ReconcileError, StoreError};
pub use provider::{DatabaseProvider, InMemoryProvider, RdsProvider};
pub use reconciler::{Outcome, Reconciler, Requeue};
pub use server::Server;
pub use store::{InMemoryStore, Store};
