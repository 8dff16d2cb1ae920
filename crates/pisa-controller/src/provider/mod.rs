//! External database providers
//!
//! A provider creates and describes managed database instances. Instances are
//! identified by the name of the VirtualDatabase they back.

mod memory;
mod rds;

pub use memory::{InMemoryProvider, ProviderCall};
pub use rds::RdsProvider;

use crate::config::{ControllerConfig, ProviderConfig};
use crate::error::ProviderError;
use async_trait::async_trait;
use pisa_types::DatabaseClass;
use std::fmt;
use std::sync::Arc;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Connection coordinates reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEndpoint {
    pub host: String,
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub identifier: String,
    /// Provider-specific lifecycle status, e.g. `creating` or `available`
    pub status: String,
    pub endpoint: Option<InstanceEndpoint>,
}

impl InstanceDescription {
    /// The endpoint, once the instance reports a usable host and port
    pub fn live_endpoint(&self) -> Option<&InstanceEndpoint> {
        self.endpoint
            .as_ref()
            .filter(|e| !e.host.is_empty() && e.port != 0)
    }
}

/// Parameters for a new instance
#[derive(Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    pub identifier: String,
    pub engine: String,
    pub engine_version: String,
    pub master_username: String,
    pub master_password: String,
    pub instance_class: String,
    pub allocated_storage: i32,
    pub db_name: String,
    pub vpc_security_group_ids: Vec<String>,
    pub subnet_group_name: Option<String>,
}

impl CreateInstanceRequest {
    pub fn from_class(
        identifier: impl Into<String>,
        class: &DatabaseClass,
        db_name: impl Into<String>,
        master_password: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            engine: class.spec.engine.name.clone(),
            engine_version: class.spec.engine.version.clone(),
            master_username: class.spec.default_master_username.clone(),
            master_password: master_password.into(),
            instance_class: class.spec.instance.class.clone(),
            allocated_storage: class.spec.storage.allocated_storage,
            db_name: db_name.into(),
            vpc_security_group_ids: class.vpc_security_group_ids(),
            subnet_group_name: class.subnet_group_name().map(String::from),
        }
    }
}

impl fmt::Debug for CreateInstanceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateInstanceRequest")
            .field("identifier", &self.identifier)
            .field("engine", &self.engine)
            .field("engine_version", &self.engine_version)
            .field("master_username", &self.master_username)
            .field("master_password", &"<redacted>")
            .field("instance_class", &self.instance_class)
            .field("allocated_storage", &self.allocated_storage)
            .field("db_name", &self.db_name)
            .field("vpc_security_group_ids", &self.vpc_security_group_ids)
            .field("subnet_group_name", &self.subnet_group_name)
            .finish()
    }
}

/// Managed database API
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Describe an instance; `ProviderError::NotFound` when it does not exist
    async fn describe_instance(&self, identifier: &str) -> ProviderResult<InstanceDescription>;

    /// Start creating an instance. Returns once the request is accepted, not
    /// when the instance is available.
    async fn create_instance(&self, request: CreateInstanceRequest) -> ProviderResult<()>;
}

/// Build the provider selected by the configuration
pub async fn build_provider(config: &ControllerConfig) -> ProviderResult<Arc<dyn DatabaseProvider>> {
    match &config.provider {
        ProviderConfig::AwsRds => Ok(Arc::new(RdsProvider::from_config(&config.aws).await?)),
        ProviderConfig::Memory {
            ready_after_describes,
        } => Ok(Arc::new(InMemoryProvider::new(*ready_after_describes))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pisa_types::{
        DatabaseClassSpec, DatabaseEngine, DatabaseInstance, DatabaseProvisioner, DatabaseStorage,
        ObjectMeta, ANNOTATION_SUBNET_GROUP_NAME, ANNOTATION_VPC_SECURITY_GROUP_IDS,
    };

    #[test]
    fn test_request_from_class() {
        let class = DatabaseClass::new(
            ObjectMeta::new("ns", "rds")
                .with_annotation(ANNOTATION_SUBNET_GROUP_NAME, "private")
                .with_annotation(ANNOTATION_VPC_SECURITY_GROUP_IDS, "sg-1,sg-2"),
            DatabaseClassSpec {
                provisioner: DatabaseProvisioner::AwsRdsInstance,
                engine: DatabaseEngine {
                    name: "mysql".to_string(),
                    version: "8.0".to_string(),
                },
                instance: DatabaseInstance {
                    class: "db.t3.micro".to_string(),
                },
                storage: DatabaseStorage {
                    allocated_storage: 20,
                },
                default_master_username: "admin".to_string(),
            },
        );

        let request = CreateInstanceRequest::from_class("app1", &class, "shop", "hunter2");
        assert_eq!(request.identifier, "app1");
        assert_eq!(request.engine_version, "8.0");
        assert_eq!(request.master_username, "admin");
        assert_eq!(request.vpc_security_group_ids, vec!["sg-1", "sg-2"]);
        assert_eq!(request.subnet_group_name.as_deref(), Some("private"));
        assert!(!format!("{:?}", request).contains("hunter2"));
    }

    #[test]
    fn test_live_endpoint_requires_host_and_port() {
        let mut description = InstanceDescription {
            identifier: "app1".to_string(),
            status: "creating".to_string(),
            endpoint: None,
        };
        assert!(description.live_endpoint().is_none());

        description.endpoint = Some(InstanceEndpoint {
            host: String::new(),
            port: 3306,
        });
        assert!(description.live_endpoint().is_none());

        description.endpoint = Some(InstanceEndpoint {
            host: "db.example".to_string(),
            port: 3306,
        });
        assert_eq!(description.live_endpoint().unwrap().host, "db.example");
    }
}
