//! VirtualDatabase - the desired set of database services
//!
//! A VirtualDatabase is written by users and only ever read by the controller.

use crate::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Desired-state entity describing a virtual database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDatabase {
    pub metadata: ObjectMeta,

    pub spec: VirtualDatabaseSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDatabaseSpec {
    /// Name of the DatabaseClass used to provision backing databases.
    /// When absent the object is inert to the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_class_name: Option<String>,

    /// Declared services, in order
    #[serde(default)]
    pub services: Vec<VirtualDatabaseService>,
}

/// One service exposed by a virtual database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDatabaseService {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "databaseMySQL", skip_serializing_if = "Option::is_none")]
    pub database_mysql: Option<DatabaseMySql>,
}

/// MySQL-specific part of a service: the logical database to create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMySql {
    pub db: String,
}

impl VirtualDatabase {
    pub fn new(metadata: ObjectMeta, spec: VirtualDatabaseSpec) -> Self {
        Self { metadata, spec }
    }

    /// Services that declare a MySQL database, with their logical db name
    pub fn mysql_services(&self) -> impl Iterator<Item = (&VirtualDatabaseService, &DatabaseMySql)> {
        self.spec
            .services
            .iter()
            .filter_map(|svc| svc.database_mysql.as_ref().map(|mysql| (svc, mysql)))
    }
}

impl VirtualDatabaseSpec {
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.database_class_name = Some(class_name.into());
        self
    }

    pub fn with_mysql_service(mut self, name: impl Into<String>, db: impl Into<String>) -> Self {
        self.services.push(VirtualDatabaseService {
            name: name.into(),
            database_mysql: Some(DatabaseMySql { db: db.into() }),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_services_skips_other_services() {
        let mut spec = VirtualDatabaseSpec::default().with_mysql_service("orders", "orders_db");
        spec.services.push(VirtualDatabaseService {
            name: "cache".to_string(),
            database_mysql: None,
        });
        let vdb = VirtualDatabase::new(ObjectMeta::new("ns", "app1"), spec);

        let dbs: Vec<_> = vdb.mysql_services().map(|(_, m)| m.db.as_str()).collect();
        assert_eq!(dbs, vec!["orders_db"]);
    }

    #[test]
    fn test_manifest_field_names() {
        let json = serde_json::json!({
            "metadata": { "name": "app1", "namespace": "ns" },
            "spec": {
                "databaseClassName": "rds-mysql",
                "services": [{ "name": "svc", "databaseMySQL": { "db": "shop" } }]
            }
        });

        let vdb: VirtualDatabase = serde_json::from_value(json).unwrap();
        assert_eq!(vdb.spec.database_class_name.as_deref(), Some("rds-mysql"));
        assert_eq!(vdb.spec.services[0].database_mysql.as_ref().unwrap().db, "shop");
    }
}
