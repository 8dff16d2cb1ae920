//! DatabaseClass - provisioning template
//!
//! A DatabaseClass tells the controller which provisioner to use and with what
//! parameters. The controller treats it as immutable configuration.

use crate::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Annotation naming the DB subnet group new instances are placed in
pub const ANNOTATION_SUBNET_GROUP_NAME: &str = "database-mesh.io/aws-rds-subnet-group-name";

/// Annotation listing VPC security group ids, comma separated
pub const ANNOTATION_VPC_SECURITY_GROUP_IDS: &str =
    "database-mesh.io/aws-rds-vpc-security-group-ids";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClass {
    pub metadata: ObjectMeta,

    pub spec: DatabaseClassSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClassSpec {
    pub provisioner: DatabaseProvisioner,

    pub engine: DatabaseEngine,

    #[serde(default)]
    pub instance: DatabaseInstance,

    #[serde(default)]
    pub storage: DatabaseStorage,

    #[serde(default)]
    pub default_master_username: String,
}

/// Strategy used to create the external database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatabaseProvisioner {
    /// A single managed RDS instance. The only provisioner the controller drives.
    AwsRdsInstance,
    AwsRdsCluster,
    AwsRdsAurora,
    Other(String),
}

impl DatabaseProvisioner {
    pub fn as_str(&self) -> &str {
        match self {
            DatabaseProvisioner::AwsRdsInstance => "AWSRdsInstance",
            DatabaseProvisioner::AwsRdsCluster => "AWSRdsCluster",
            DatabaseProvisioner::AwsRdsAurora => "AWSRdsAurora",
            DatabaseProvisioner::Other(s) => s,
        }
    }
}

impl From<String> for DatabaseProvisioner {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AWSRdsInstance" => DatabaseProvisioner::AwsRdsInstance,
            "AWSRdsCluster" => DatabaseProvisioner::AwsRdsCluster,
            "AWSRdsAurora" => DatabaseProvisioner::AwsRdsAurora,
            _ => DatabaseProvisioner::Other(value),
        }
    }
}

impl From<DatabaseProvisioner> for String {
    fn from(value: DatabaseProvisioner) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DatabaseProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database engine name and version, e.g. `mysql` / `8.0`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEngine {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    /// Instance class, e.g. `db.t3.micro`
    pub class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStorage {
    /// Allocated storage in GiB
    pub allocated_storage: i32,
}

impl DatabaseClass {
    pub fn new(metadata: ObjectMeta, spec: DatabaseClassSpec) -> Self {
        Self { metadata, spec }
    }

    pub fn is_cloud_managed(&self) -> bool {
        self.spec.provisioner == DatabaseProvisioner::AwsRdsInstance
    }

    pub fn subnet_group_name(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(ANNOTATION_SUBNET_GROUP_NAME)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Security group ids from the annotation; blank entries are dropped.
    pub fn vpc_security_group_ids(&self) -> Vec<String> {
        self.metadata
            .annotations
            .get(ANNOTATION_VPC_SECURITY_GROUP_IDS)
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rds_class() -> DatabaseClass {
        DatabaseClass::new(
            ObjectMeta::new("ns", "rds-mysql")
                .with_annotation(ANNOTATION_SUBNET_GROUP_NAME, "private")
                .with_annotation(ANNOTATION_VPC_SECURITY_GROUP_IDS, "sg-1, sg-2,,"),
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
        )
    }

    #[test]
    fn test_annotations() {
        let class = rds_class();
        assert_eq!(class.subnet_group_name(), Some("private"));
        assert_eq!(class.vpc_security_group_ids(), vec!["sg-1", "sg-2"]);
    }

    #[test]
    fn test_missing_annotations() {
        let mut class = rds_class();
        class.metadata.annotations.clear();
        assert_eq!(class.subnet_group_name(), None);
        assert!(class.vpc_security_group_ids().is_empty());
    }

    #[test]
    fn test_provisioner_serde() {
        let p: DatabaseProvisioner = serde_json::from_str("\"AWSRdsInstance\"").unwrap();
        assert_eq!(p, DatabaseProvisioner::AwsRdsInstance);

        let p: DatabaseProvisioner = serde_json::from_str("\"Local\"").unwrap();
        assert_eq!(p, DatabaseProvisioner::Other("Local".to_string()));
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"Local\"");
    }

    #[test]
    fn test_only_rds_instance_is_cloud_managed() {
        let mut class = rds_class();
        assert!(class.is_cloud_managed());
        class.spec.provisioner = DatabaseProvisioner::AwsRdsAurora;
        assert!(!class.is_cloud_managed());
    }
}
