//! Convergence of a cloud-backed VirtualDatabase
//!
//! Each MySQL service runs two steps: make sure the DB instance exists, then
//! bring the DatabaseEndpoint in line with what the provider reports. The
//! instance goes `NoInstance → Provisioning → Live`; once the endpoint holds a
//! host and port they are only ever replaced, never cleared.

use super::{cancellable, Outcome, Reconciler};
use crate::error::{ProviderError, ReconcileError};
use crate::provider::{CreateInstanceRequest, InstanceDescription};
use pisa_types::{DatabaseClass, DatabaseEndpoint, ObjectKey, Resource, VirtualDatabase};
use tokio_util::sync::CancellationToken;

/// Side-effect bookkeeping for one pass
#[derive(Debug, Default)]
struct Pass {
    create_issued: bool,
    first_error: Option<ReconcileError>,
    /// An endpoint update failed; retry without backoff
    immediate: bool,
}

impl Reconciler {
    pub(super) async fn converge(
        &self,
        vdb: &VirtualDatabase,
        class: &DatabaseClass,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        let key = vdb.key();
        let mut pass = Pass::default();

        for (service, mysql) in vdb.mysql_services() {
            let result = self
                .converge_service(&key, class, &mysql.db, &mut pass, cancel)
                .await;

            match result {
                Ok(()) => {}
                Err(ReconcileError::Cancelled) => return Err(ReconcileError::Cancelled),
                Err(error) => {
                    tracing::warn!(service = %service.name, error = %error, "Service convergence failed");
                    if pass.first_error.is_none() {
                        pass.first_error = Some(error);
                    }
                }
            }
        }

        Ok(match pass.first_error {
            None => Outcome::requeue_after(self.recheck_interval),
            Some(error) if pass.immediate => Outcome::requeue_immediately(error),
            Some(error) => Outcome::failed(error),
        })
    }

    async fn converge_service(
        &self,
        key: &ObjectKey,
        class: &DatabaseClass,
        db: &str,
        pass: &mut Pass,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let identifier = key.name.as_str();

        provider_call("describe");
        let description = match cancellable(cancel, self.provider.describe_instance(identifier)).await? {
            Ok(description) => {
                tracing::debug!(identifier, status = %description.status, "Described DB instance");
                Some(description)
            }
            Err(ProviderError::NotFound(_)) => {
                if !pass.create_issued {
                    self.provision(key, class, db, pass, cancel).await?;
                }
                None
            }
            Err(error) => return Err(error.into()),
        };

        self.sync_endpoint(key, class, db, description.as_ref(), pass, cancel)
            .await
    }

    async fn provision(
        &self,
        key: &ObjectKey,
        class: &DatabaseClass,
        db: &str,
        pass: &mut Pass,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let password = self.ensure_credential(key, class, db, cancel).await?;
        let request = CreateInstanceRequest::from_class(key.name.as_str(), class, db, password);

        pass.create_issued = true;
        provider_call("create");
        match cancellable(cancel, self.provider.create_instance(request)).await? {
            Ok(()) => {
                tracing::info!(
                    identifier = %key.name,
                    engine = %class.spec.engine.name,
                    version = %class.spec.engine.version,
                    "Creating DB instance"
                );
                Ok(())
            }
            Err(ProviderError::AlreadyExists(_)) => {
                tracing::debug!(identifier = %key.name, "DB instance already exists");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Master password for a new instance. The endpoint, and the password with
    /// it, is persisted before the instance is requested. An existing endpoint
    /// without a password is an error; no unrecorded password is ever sent.
    async fn ensure_credential(
        &self,
        key: &ObjectKey,
        class: &DatabaseClass,
        db: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ReconcileError> {
        match cancellable(cancel, self.store.get_database_endpoint(key)).await? {
            Ok(endpoint) => {
                let stored = endpoint
                    .mysql()
                    .map(|m| m.password.clone())
                    .filter(|p| !p.is_empty());
                // An empty password was left by an instance adopted without its
                // credential. Creating with a fresh one would lose it again.
                stored.ok_or_else(|| ReconcileError::MissingCredential {
                    endpoint: key.clone(),
                })
            }
            Err(e) if e.is_not_found() => {
                let password = self.passwords.generate();
                let endpoint = DatabaseEndpoint::pending(
                    key.namespace.as_str(),
                    key.name.as_str(),
                    class.spec.default_master_username.as_str(),
                    password.as_str(),
                    db,
                );
                cancellable(cancel, self.store.create_database_endpoint(endpoint)).await??;
                tracing::info!("Created DatabaseEndpoint");
                Ok(password)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn sync_endpoint(
        &self,
        key: &ObjectKey,
        class: &DatabaseClass,
        db: &str,
        description: Option<&InstanceDescription>,
        pass: &mut Pass,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let mut endpoint = match cancellable(cancel, self.store.get_database_endpoint(key)).await? {
            Ok(endpoint) => endpoint,
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    identifier = %key.name,
                    "DB instance exists without a DatabaseEndpoint, its master password cannot be recovered"
                );
                let endpoint = DatabaseEndpoint::pending(
                    key.namespace.as_str(),
                    key.name.as_str(),
                    class.spec.default_master_username.as_str(),
                    "",
                    db,
                );
                cancellable(cancel, self.store.create_database_endpoint(endpoint)).await??;
                tracing::info!("Created DatabaseEndpoint");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(live) = description.and_then(InstanceDescription::live_endpoint) else {
            tracing::debug!(identifier = %key.name, "DB instance not live yet");
            return Ok(());
        };

        if !endpoint.set_address(&live.host, live.port) {
            return Ok(());
        }

        match cancellable(cancel, self.store.update_database_endpoint(endpoint)).await? {
            Ok(_) => {
                tracing::info!(host = %live.host, port = live.port, "Updated DatabaseEndpoint address");
                Ok(())
            }
            Err(e) => {
                pass.immediate = true;
                Err(e.into())
            }
        }
    }
}

fn provider_call(op: &'static str) {
    metrics::counter!("pisa_provider_calls_total", "op" => op).increment(1);
}
