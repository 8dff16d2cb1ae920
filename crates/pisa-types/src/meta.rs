//! Object metadata shared by all resource kinds

use crate::{Kind, ObjectKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata carried by every stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Version assigned by the store on every write; zero means never stored.
    #[serde(default)]
    pub resource_version: u64,

    /// Back-reference to the owning object, which lives in the same namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Key of the owning object, if any.
    pub fn owner_key(&self) -> Option<(Kind, ObjectKey)> {
        self.owner
            .as_ref()
            .map(|o| (o.kind, ObjectKey::new(self.namespace.clone(), o.name.clone())))
    }
}

/// Explicit link from a dependent object to its owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
}

impl OwnerReference {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}
