//! In-process provider for development and tests

use super::{CreateInstanceRequest, DatabaseProvider, InstanceDescription, InstanceEndpoint, ProviderResult};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A call received by the in-memory provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Describe(String),
    Create(CreateInstanceRequest),
}

#[derive(Debug)]
struct FakeInstance {
    describes: u32,
    endpoint: Option<InstanceEndpoint>,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<String, FakeInstance>,
    calls: Vec<ProviderCall>,
    describe_failures: VecDeque<ProviderError>,
    create_failures: VecDeque<ProviderError>,
    /// While set, create calls are recorded and then wait for release
    create_gate: Option<Arc<Notify>>,
}

/// Provider that keeps instances in memory.
///
/// A created instance reports status `creating` and no endpoint until it has
/// been described `ready_after_describes` times, then becomes `available` at
/// `<identifier>.pisa.local:3306`. Zero disables the automatic transition;
/// use [`InMemoryProvider::mark_available`] instead.
#[derive(Debug)]
pub struct InMemoryProvider {
    ready_after_describes: u32,
    state: Mutex<State>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(0)
    }
}

impl InMemoryProvider {
    pub fn new(ready_after_describes: u32) -> Self {
        Self {
            ready_after_describes,
            state: Mutex::new(State::default()),
        }
    }

    /// Register an instance that already exists and is available
    pub async fn insert_available(&self, identifier: &str, host: &str, port: u32) {
        let mut state = self.state.lock().await;
        state.instances.insert(
            identifier.to_string(),
            FakeInstance {
                describes: 0,
                endpoint: Some(InstanceEndpoint {
                    host: host.to_string(),
                    port,
                }),
            },
        );
    }

    /// Finish provisioning of an existing instance
    pub async fn mark_available(&self, identifier: &str, host: &str, port: u32) -> bool {
        let mut state = self.state.lock().await;
        match state.instances.get_mut(identifier) {
            Some(instance) => {
                instance.endpoint = Some(InstanceEndpoint {
                    host: host.to_string(),
                    port,
                });
                true
            }
            None => false,
        }
    }

    /// Make the next describe call fail with `error`
    pub async fn fail_next_describe(&self, error: ProviderError) {
        self.state.lock().await.describe_failures.push_back(error);
    }

    /// Make the next create call fail with `error`
    pub async fn fail_next_create(&self, error: ProviderError) {
        self.state.lock().await.create_failures.push_back(error);
    }

    /// Hold every following create call until [`InMemoryProvider::release_creates`]
    pub async fn hold_creates(&self) {
        self.state.lock().await.create_gate = Some(Arc::new(Notify::new()));
    }

    /// Let held create calls continue
    pub async fn release_creates(&self) {
        if let Some(gate) = self.state.lock().await.create_gate.take() {
            gate.notify_waiters();
        }
    }

    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn create_requests(&self) -> Vec<CreateInstanceRequest> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::Create(request) => Some(request.clone()),
                ProviderCall::Describe(_) => None,
            })
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait]
impl DatabaseProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn describe_instance(&self, identifier: &str) -> ProviderResult<InstanceDescription> {
        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::Describe(identifier.to_string()));

        if let Some(error) = state.describe_failures.pop_front() {
            return Err(error);
        }

        let ready_after = self.ready_after_describes;
        let instance = state
            .instances
            .get_mut(identifier)
            .ok_or_else(|| ProviderError::NotFound(identifier.to_string()))?;

        instance.describes += 1;
        if instance.endpoint.is_none() && ready_after > 0 && instance.describes >= ready_after {
            instance.endpoint = Some(InstanceEndpoint {
                host: format!("{}.pisa.local", identifier),
                port: 3306,
            });
        }

        Ok(InstanceDescription {
            identifier: identifier.to_string(),
            status: if instance.endpoint.is_some() {
                "available".to_string()
            } else {
                "creating".to_string()
            },
            endpoint: instance.endpoint.clone(),
        })
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ProviderCall::Create(request.clone()));

        if let Some(gate) = state.create_gate.clone() {
            // Registered before the lock is released, so a release cannot be missed
            let released = gate.notified();
            drop(state);
            released.await;
            state = self.state.lock().await;
        }

        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        if state.instances.contains_key(&request.identifier) {
            return Err(ProviderError::AlreadyExists(request.identifier));
        }

        tracing::debug!(identifier = %request.identifier, "Creating in-memory instance");
        state.instances.insert(
            request.identifier,
            FakeInstance {
                describes: 0,
                endpoint: None,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(identifier: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            identifier: identifier.to_string(),
            engine: "mysql".to_string(),
            engine_version: "8.0".to_string(),
            master_username: "admin".to_string(),
            master_password: "pw".to_string(),
            instance_class: "db.t3.micro".to_string(),
            allocated_storage: 20,
            db_name: "shop".to_string(),
            vpc_security_group_ids: vec![],
            subnet_group_name: None,
        }
    }

    #[tokio::test]
    async fn test_describe_missing() {
        let provider = InMemoryProvider::default();
        let err = provider.describe_instance("app1").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(id) if id == "app1"));
    }

    #[tokio::test]
    async fn test_becomes_available_after_describes() {
        let provider = InMemoryProvider::new(2);
        provider.create_instance(request("app1")).await.unwrap();

        let first = provider.describe_instance("app1").await.unwrap();
        assert_eq!(first.status, "creating");
        assert!(first.live_endpoint().is_none());

        let second = provider.describe_instance("app1").await.unwrap();
        assert_eq!(second.status, "available");
        assert_eq!(second.live_endpoint().unwrap().host, "app1.pisa.local");
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let provider = InMemoryProvider::default();
        provider.create_instance(request("app1")).await.unwrap();
        let err = provider.create_instance(request("app1")).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
        assert_eq!(provider.create_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let provider = InMemoryProvider::default();
        provider.insert_available("app1", "db.example", 3306).await;
        provider
            .fail_next_describe(ProviderError::Api("throttled".to_string()))
            .await;

        assert!(matches!(
            provider.describe_instance("app1").await,
            Err(ProviderError::Api(_))
        ));
        assert!(provider.describe_instance("app1").await.is_ok());
    }
}
