//! HTTP surfaces: resource API, health probes and metrics

pub mod rest;

pub use rest::router::{create_metrics_router, create_probe_router, create_router};
