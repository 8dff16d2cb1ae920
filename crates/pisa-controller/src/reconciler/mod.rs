//! Reconciliation engine
//!
//! [`Reconciler::reconcile`] drives one VirtualDatabase one step towards its
//! desired state and reports what should happen next as an [`Outcome`]. It
//! never retries by itself; retry policy belongs to the work queue.

mod cloud;
mod outcome;

pub use outcome::{Outcome, Requeue};

use crate::credentials::PasswordGenerator;
use crate::error::ReconcileError;
use crate::provider::DatabaseProvider;
use crate::store::Store;
use pisa_types::ObjectKey;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Reconciles VirtualDatabases against a database provider
pub struct Reconciler {
    store: Arc<dyn Store>,
    provider: Arc<dyn DatabaseProvider>,
    passwords: Arc<dyn PasswordGenerator>,
    recheck_interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn DatabaseProvider>,
        passwords: Arc<dyn PasswordGenerator>,
        recheck_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            passwords,
            recheck_interval,
        }
    }

    /// Run one pass for the VirtualDatabase at `key`
    #[tracing::instrument(skip(self, cancel), fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Outcome {
        let started = Instant::now();

        let outcome = match self.try_reconcile(key, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => Outcome::failed(error),
        };

        metrics::counter!("pisa_reconcile_total", "result" => outcome.result_label()).increment(1);
        metrics::histogram!("pisa_reconcile_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    async fn try_reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        let vdb = match cancellable(cancel, self.store.get_virtual_database(key)).await? {
            Ok(vdb) => vdb,
            Err(e) if e.is_not_found() => {
                tracing::debug!("VirtualDatabase no longer exists");
                return Ok(Outcome::done());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(class_name) = vdb
            .spec
            .database_class_name
            .as_deref()
            .filter(|name| !name.is_empty())
        else {
            tracing::debug!("No DatabaseClass referenced");
            return Ok(Outcome::requeue_after(self.recheck_interval));
        };

        let class_key = key.sibling(class_name);
        let class = match cancellable(cancel, self.store.get_database_class(&class_key)).await? {
            Ok(class) => class,
            Err(e) if e.is_not_found() => {
                return Err(ReconcileError::ClassNotFound { class: class_key })
            }
            Err(e) => return Err(e.into()),
        };

        if !class.is_cloud_managed() {
            tracing::debug!(provisioner = %class.spec.provisioner, "Provisioner not managed");
            return Ok(Outcome::requeue_after(self.recheck_interval));
        }

        self.converge(&vdb, &class, cancel).await
    }
}

/// Await `fut` unless `cancel` fires first
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, ReconcileError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        output = fut => Ok(output),
    }
}
