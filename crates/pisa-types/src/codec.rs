//! Per-kind codecs
//!
//! Objects are persisted and exchanged as manifests: the resource body plus an
//! `apiVersion` / `kind` header. A [`CodecTable`] maps each kind to its encode
//! and decode functions. The table is built once at startup and handed to
//! whatever needs to (de)serialize objects, so there is no global registry.

use crate::{
    DatabaseClass, DatabaseEndpoint, Kind, ObjectKey, ObjectMeta, VirtualDatabase, API_VERSION,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while encoding or decoding manifests
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no codec registered for kind {0}")]
    Unregistered(String),

    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: Kind, found: String },

    #[error("unsupported apiVersion {0:?}")]
    ApiVersion(String),

    #[error("manifest is missing the {0} field")]
    MissingField(&'static str),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A typed resource kind
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: Kind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }

    fn into_object(self) -> Object;

    fn from_object_ref(object: &Object) -> Option<&Self>;

    fn try_from_object(object: Object) -> Result<Self, Object>;
}

/// Any object the store can hold
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    VirtualDatabase(VirtualDatabase),
    DatabaseClass(DatabaseClass),
    DatabaseEndpoint(DatabaseEndpoint),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::VirtualDatabase(_) => Kind::VirtualDatabase,
            Object::DatabaseClass(_) => Kind::DatabaseClass,
            Object::DatabaseEndpoint(_) => Kind::DatabaseEndpoint,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Object::VirtualDatabase(o) => &o.metadata,
            Object::DatabaseClass(o) => &o.metadata,
            Object::DatabaseEndpoint(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Object::VirtualDatabase(o) => &mut o.metadata,
            Object::DatabaseClass(o) => &mut o.metadata,
            Object::DatabaseEndpoint(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}

macro_rules! impl_resource {
    ($ty:ident) => {
        impl Resource for $ty {
            const KIND: Kind = Kind::$ty;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn into_object(self) -> Object {
                Object::$ty(self)
            }

            fn from_object_ref(object: &Object) -> Option<&Self> {
                match object {
                    Object::$ty(o) => Some(o),
                    _ => None,
                }
            }

            fn try_from_object(object: Object) -> Result<Self, Object> {
                match object {
                    Object::$ty(o) => Ok(o),
                    other => Err(other),
                }
            }
        }
    };
}

impl_resource!(VirtualDatabase);
impl_resource!(DatabaseClass);
impl_resource!(DatabaseEndpoint);

struct Codec {
    decode: fn(Value) -> Result<Object, CodecError>,
    encode: fn(&Object) -> Result<Value, CodecError>,
}

fn decode_resource<R: Resource>(value: Value) -> Result<Object, CodecError> {
    Ok(serde_json::from_value::<R>(value)?.into_object())
}

fn encode_resource<R: Resource>(object: &Object) -> Result<Value, CodecError> {
    let resource = R::from_object_ref(object).ok_or_else(|| CodecError::KindMismatch {
        expected: R::KIND,
        found: object.kind().to_string(),
    })?;
    Ok(serde_json::to_value(resource)?)
}

/// Kind → codec lookup table
#[derive(Default)]
pub struct CodecTable {
    codecs: HashMap<Kind, Codec>,
}

impl std::fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl CodecTable {
    /// Empty table; nothing can be encoded until kinds are registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every kind the controller handles
    pub fn standard() -> Self {
        Self::new()
            .register::<VirtualDatabase>()
            .register::<DatabaseClass>()
            .register::<DatabaseEndpoint>()
    }

    pub fn register<R: Resource>(mut self) -> Self {
        self.codecs.insert(
            R::KIND,
            Codec {
                decode: decode_resource::<R>,
                encode: encode_resource::<R>,
            },
        );
        self
    }

    pub fn kinds(&self) -> Vec<Kind> {
        let mut kinds: Vec<_> = self.codecs.keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn codec(&self, kind: Kind) -> Result<&Codec, CodecError> {
        self.codecs
            .get(&kind)
            .ok_or_else(|| CodecError::Unregistered(kind.to_string()))
    }

    /// Manifest form of an object, with the `apiVersion` / `kind` header.
    pub fn to_manifest(&self, object: &Object) -> Result<Value, CodecError> {
        let kind = object.kind();
        let mut value = (self.codec(kind)?.encode)(object)?;
        if let Value::Object(map) = &mut value {
            map.insert("apiVersion".to_string(), Value::from(API_VERSION));
            map.insert("kind".to_string(), Value::from(kind.as_str()));
        }
        Ok(value)
    }

    pub fn encode(&self, object: &Object) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.to_manifest(object)?)?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Object, CodecError> {
        self.from_manifest(serde_json::from_slice(bytes)?)
    }

    /// Decode bytes that must hold a specific kind
    pub fn decode_as<R: Resource>(&self, bytes: &[u8]) -> Result<R, CodecError> {
        R::try_from_object(self.decode(bytes)?).map_err(|other| CodecError::KindMismatch {
            expected: R::KIND,
            found: other.kind().to_string(),
        })
    }

    pub fn from_manifest(&self, value: Value) -> Result<Object, CodecError> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingField("apiVersion"))?;
        if api_version != API_VERSION {
            return Err(CodecError::ApiVersion(api_version.to_string()));
        }

        let kind_name = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingField("kind"))?;
        let kind = Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == kind_name)
            .ok_or_else(|| CodecError::Unregistered(kind_name.to_string()))?;

        (self.codec(kind)?.decode)(value)
    }

    /// Decode a multi-document YAML stream. Empty documents are skipped.
    pub fn decode_yaml(&self, text: &str) -> Result<Vec<Object>, CodecError> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            objects.push(self.from_manifest(value)?);
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VirtualDatabaseSpec, ANNOTATION_SUBNET_GROUP_NAME};

    fn vdb() -> VirtualDatabase {
        VirtualDatabase::new(
            ObjectMeta::new("ns", "app1"),
            VirtualDatabaseSpec::default()
                .with_class("rds-mysql")
                .with_mysql_service("svc", "shop"),
        )
    }

    #[test]
    fn test_manifest_header() {
        let table = CodecTable::standard();
        let manifest = table.to_manifest(&vdb().into_object()).unwrap();

        assert_eq!(manifest["apiVersion"], API_VERSION);
        assert_eq!(manifest["kind"], "VirtualDatabase");
        assert_eq!(manifest["spec"]["databaseClassName"], "rds-mysql");
    }

    #[test]
    fn test_decode_as_rejects_other_kind() {
        let table = CodecTable::standard();
        let bytes = table.encode(&vdb().into_object()).unwrap();

        let err = table.decode_as::<DatabaseEndpoint>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CodecError::KindMismatch {
                expected: Kind::DatabaseEndpoint,
                ..
            }
        ));
        assert_eq!(table.decode_as::<VirtualDatabase>(&bytes).unwrap(), vdb());
    }

    #[test]
    fn test_unregistered_kind() {
        let table = CodecTable::new().register::<DatabaseClass>();
        let err = table.encode(&vdb().into_object()).unwrap_err();
        assert!(matches!(err, CodecError::Unregistered(_)));
    }

    #[test]
    fn test_wrong_api_version() {
        let table = CodecTable::standard();
        let err = table
            .from_manifest(serde_json::json!({
                "apiVersion": "v1",
                "kind": "VirtualDatabase",
                "metadata": { "name": "a", "namespace": "b" },
                "spec": {}
            }))
            .unwrap_err();
        assert!(matches!(err, CodecError::ApiVersion(v) if v == "v1"));
    }

    #[test]
    fn test_decode_yaml_stream() {
        let yaml = format!(
            r#"
apiVersion: {api}
kind: DatabaseClass
metadata:
  name: rds-mysql
  namespace: ns
  annotations:
    {subnet}: private
spec:
  provisioner: AWSRdsInstance
  engine:
    name: mysql
    version: "8.0"
  instance:
    class: db.t3.micro
  storage:
    allocatedStorage: 20
  defaultMasterUsername: admin
---
---
apiVersion: {api}
kind: VirtualDatabase
metadata:
  name: app1
  namespace: ns
spec:
  databaseClassName: rds-mysql
  services:
    - name: svc
      databaseMySQL:
        db: shop
"#,
            api = API_VERSION,
            subnet = ANNOTATION_SUBNET_GROUP_NAME,
        );

        let objects = CodecTable::standard().decode_yaml(&yaml).unwrap();
        assert_eq!(objects.len(), 2);

        let class = DatabaseClass::try_from_object(objects[0].clone()).unwrap();
        assert!(class.is_cloud_managed());
        assert_eq!(class.spec.storage.allocated_storage, 20);
        assert_eq!(class.subnet_group_name(), Some("private"));
        assert_eq!(objects[1].key(), ObjectKey::new("ns", "app1"));
    }
}
