//! AWS RDS provider

use super::{CreateInstanceRequest, DatabaseProvider, InstanceDescription, InstanceEndpoint, ProviderResult};
use crate::config::AwsConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_rds::error::DisplayErrorContext;
use aws_sdk_rds::Client;

/// RDS instances, one per VirtualDatabase, keyed by `DBInstanceIdentifier`
#[derive(Debug, Clone)]
pub struct RdsProvider {
    client: Client,
}

impl RdsProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from explicit static credentials when both keys are
    /// configured, otherwise from the default AWS credential chain.
    pub async fn from_config(config: &AwsConfig) -> ProviderResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "pisa-controller",
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ProviderError::Credentials(
                    "both access key id and secret access key must be set".to_string(),
                ));
            }
            (None, None) => {
                tracing::info!("No static AWS credentials configured, using the default chain");
            }
        }

        let sdk_config = loader.load().await;
        if sdk_config.region().is_none() {
            return Err(ProviderError::Credentials("no AWS region configured".to_string()));
        }

        Ok(Self::new(Client::new(&sdk_config)))
    }
}

#[async_trait]
impl DatabaseProvider for RdsProvider {
    fn name(&self) -> &'static str {
        "aws-rds"
    }

    async fn describe_instance(&self, identifier: &str) -> ProviderResult<InstanceDescription> {
        let output = self
            .client
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_db_instance_not_found_fault())
                    .unwrap_or(false);
                if not_found {
                    ProviderError::NotFound(identifier.to_string())
                } else {
                    ProviderError::Api(DisplayErrorContext(&e).to_string())
                }
            })?;

        let instance = output
            .db_instances()
            .first()
            .ok_or_else(|| ProviderError::NotFound(identifier.to_string()))?;

        let endpoint = instance.endpoint().map(|ep| InstanceEndpoint {
            host: ep.address().unwrap_or_default().to_string(),
            port: ep.port().and_then(|p| u32::try_from(p).ok()).unwrap_or(0),
        });

        Ok(InstanceDescription {
            identifier: instance
                .db_instance_identifier()
                .unwrap_or(identifier)
                .to_string(),
            status: instance.db_instance_status().unwrap_or_default().to_string(),
            endpoint,
        })
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> ProviderResult<()> {
        let identifier = request.identifier.clone();

        let security_groups = if request.vpc_security_group_ids.is_empty() {
            None
        } else {
            Some(request.vpc_security_group_ids)
        };

        self.client
            .create_db_instance()
            .db_instance_identifier(request.identifier)
            .engine(request.engine)
            .engine_version(request.engine_version)
            .db_instance_class(request.instance_class)
            .allocated_storage(request.allocated_storage)
            .master_username(request.master_username)
            .master_user_password(request.master_password)
            .db_name(request.db_name)
            .set_vpc_security_group_ids(security_groups)
            .set_db_subnet_group_name(request.subnet_group_name)
            .send()
            .await
            .map_err(|e| {
                let exists = e
                    .as_service_error()
                    .map(|se| se.is_db_instance_already_exists_fault())
                    .unwrap_or(false);
                if exists {
                    ProviderError::AlreadyExists(identifier.clone())
                } else {
                    ProviderError::Api(DisplayErrorContext(&e).to_string())
                }
            })?;

        Ok(())
    }
}
