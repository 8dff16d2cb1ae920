//! DatabaseEndpoint - observed connection details
//!
//! Derived from a VirtualDatabase and owned by it: both share namespace and
//! name. Credentials and db are fixed at creation; host and port are filled in
//! once the external instance is live.

use crate::{Kind, ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseEndpoint {
    pub metadata: ObjectMeta,

    pub spec: DatabaseEndpointSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEndpointSpec {
    pub database: Database,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    #[serde(default, rename = "MySQL", skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MySql>,
}

/// MySQL connection coordinates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySql {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: String,
}

impl DatabaseEndpoint {
    /// Endpoint owned by the VirtualDatabase `namespace/name`, with host and
    /// port left empty until the instance is observed live.
    pub fn pending(
        namespace: impl Into<String>,
        name: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        db: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            metadata: ObjectMeta::new(namespace, name.clone())
                .with_owner(OwnerReference::new(Kind::VirtualDatabase, name)),
            spec: DatabaseEndpointSpec {
                database: Database {
                    mysql: Some(MySql {
                        host: String::new(),
                        port: 0,
                        user: user.into(),
                        password: password.into(),
                        db: db.into(),
                    }),
                },
            },
        }
    }

    pub fn mysql(&self) -> Option<&MySql> {
        self.spec.database.mysql.as_ref()
    }

    /// True once host and port have been populated
    pub fn is_populated(&self) -> bool {
        self.mysql()
            .map(|m| !m.host.is_empty() && m.port != 0)
            .unwrap_or(false)
    }

    /// Set host and port. Returns false when they already hold these values.
    pub fn set_address(&mut self, host: &str, port: u32) -> bool {
        let mysql = self.spec.database.mysql.get_or_insert_with(MySql::default);
        if mysql.host == host && mysql.port == port {
            return false;
        }
        mysql.host = host.to_string();
        mysql.port = port;
        true
    }
}
