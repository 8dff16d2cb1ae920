//! Store trait definitions

use crate::error::StoreError;
use async_trait::async_trait;
use pisa_types::{DatabaseClass, DatabaseEndpoint, Kind, ObjectKey, VirtualDatabase};
use tokio::sync::broadcast;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Combined store trait
pub trait Store:
    VirtualDatabaseStore + DatabaseClassStore + DatabaseEndpointStore + WatchStore + Send + Sync
{
}

/// Storage for VirtualDatabases
#[async_trait]
pub trait VirtualDatabaseStore: Send + Sync {
    /// Get a VirtualDatabase; `StoreError::NotFound` when absent
    async fn get_virtual_database(&self, key: &ObjectKey) -> StoreResult<VirtualDatabase>;

    async fn list_virtual_databases(&self) -> StoreResult<Vec<VirtualDatabase>>;

    /// Create or update
    async fn apply_virtual_database(&self, vdb: VirtualDatabase) -> StoreResult<VirtualDatabase>;
}

/// Storage for DatabaseClasses
#[async_trait]
pub trait DatabaseClassStore: Send + Sync {
    async fn get_database_class(&self, key: &ObjectKey) -> StoreResult<DatabaseClass>;

    /// Create or update
    async fn apply_database_class(&self, class: DatabaseClass) -> StoreResult<DatabaseClass>;
}

/// Storage for DatabaseEndpoints
#[async_trait]
pub trait DatabaseEndpointStore: Send + Sync {
    async fn get_database_endpoint(&self, key: &ObjectKey) -> StoreResult<DatabaseEndpoint>;

    /// Create; `StoreError::AlreadyExists` if the key is taken
    async fn create_database_endpoint(
        &self,
        endpoint: DatabaseEndpoint,
    ) -> StoreResult<DatabaseEndpoint>;

    /// Update; the resource version must match the stored one
    async fn update_database_endpoint(
        &self,
        endpoint: DatabaseEndpoint,
    ) -> StoreResult<DatabaseEndpoint>;
}

/// Change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub kind: Kind,
    pub key: ObjectKey,
    /// Owner of the changed object, taken from its back-reference
    pub owner: Option<(Kind, ObjectKey)>,
    pub resource_version: u64,
}

/// Change subscription and ownership index
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Subscribe to every change made after this call
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;

    /// Objects whose back-reference names `owner`
    async fn dependents_of(&self, kind: Kind, owner: &ObjectKey)
        -> StoreResult<Vec<(Kind, ObjectKey)>>;
}
