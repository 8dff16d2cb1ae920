//! Resource identities
//!
//! Every object is addressed by namespace and name. The kind is carried
//! separately because a VirtualDatabase and its DatabaseEndpoint share a key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a sibling object in the same namespace.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Error parsing an `ObjectKey` from its `namespace/name` form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object key {0:?}, expected namespace/name")]
pub struct ObjectKeyError(pub String);

impl FromStr for ObjectKey {
    type Err = ObjectKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ObjectKeyError(s.to_string())),
        }
    }
}

/// Resource kinds understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    VirtualDatabase,
    DatabaseClass,
    DatabaseEndpoint,
}

impl Kind {
    pub const ALL: [Kind; 3] = [
        Kind::VirtualDatabase,
        Kind::DatabaseClass,
        Kind::DatabaseEndpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::VirtualDatabase => "VirtualDatabase",
            Kind::DatabaseClass => "DatabaseClass",
            Kind::DatabaseEndpoint => "DatabaseEndpoint",
        }
    }

    /// Lowercase plural used in resource API paths
    pub fn plural(&self) -> &'static str {
        match self {
            Kind::VirtualDatabase => "virtualdatabases",
            Kind::DatabaseClass => "databaseclasses",
            Kind::DatabaseEndpoint => "databaseendpoints",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.plural() == s)
            .ok_or_else(|| format!("unknown kind: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("ns", "app1");
        assert_eq!(key.to_string(), "ns/app1");
    }

    #[test]
    fn test_object_key_rejects_malformed() {
        assert!("app1".parse::<ObjectKey>().is_err());
        assert!("/app1".parse::<ObjectKey>().is_err());
        assert!("ns/".parse::<ObjectKey>().is_err());
        assert!("ns/a/b".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_kind_parses_singular_and_plural() {
        assert_eq!("VirtualDatabase".parse::<Kind>(), Ok(Kind::VirtualDatabase));
        assert_eq!("databaseendpoints".parse::<Kind>(), Ok(Kind::DatabaseEndpoint));
        assert!("Pod".parse::<Kind>().is_err());
    }

    proptest! {
        #[test]
        fn property_key_display_parses_back(
            namespace in "[a-z0-9-]{1,16}",
            name in "[a-z0-9-]{1,16}",
        ) {
            let key = ObjectKey::new(namespace, name);
            prop_assert_eq!(key.to_string().parse::<ObjectKey>(), Ok(key));
        }
    }
}
