//! Pisanix Types - Resource model for the pisa controller
//!
//! The controller converges three kinds of desired-state objects:
//!
//! - **VirtualDatabase**: what the user wants (a set of database services)
//! - **DatabaseClass**: how to provision it (provisioner, engine, sizing)
//! - **DatabaseEndpoint**: derived connection details, owned by a VirtualDatabase
//!
//! Objects travel through the store in encoded form. Encoding is driven by an
//! explicit [`CodecTable`] built once at startup rather than a process-wide
//! type registry.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod codec;
pub mod database_class;
pub mod database_endpoint;
pub mod ids;
pub mod meta;
pub mod virtual_database;

/// API group and version shared by every resource kind.
pub const API_VERSION: &str = "database-mesh.io/v1alpha1";

pub use codec::{CodecError, CodecTable, Object, Resource};
pub use database_class::{
    DatabaseClass, DatabaseClassSpec, DatabaseEngine, DatabaseInstance, DatabaseProvisioner,
    DatabaseStorage, ANNOTATION_SUBNET_GROUP_NAME, ANNOTATION_VPC_SECURITY_GROUP_IDS,
};
pub use database_endpoint::{Database, DatabaseEndpoint, DatabaseEndpointSpec, MySql};
pub use ids::{Kind, ObjectKey, ObjectKeyError};
pub use meta::{ObjectMeta, OwnerReference};
pub use virtual_database::{
    DatabaseMySql, VirtualDatabase, VirtualDatabaseService, VirtualDatabaseSpec,
};
