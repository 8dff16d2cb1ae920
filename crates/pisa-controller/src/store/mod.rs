//! Desired-state store
//!
//! Holds VirtualDatabases, DatabaseClasses and DatabaseEndpoints, notifies
//! watchers of every change and indexes dependents by owner.

mod manifests;
mod memory;
mod traits;

pub use manifests::{apply_object, load_manifests};
pub use memory::InMemoryStore;
pub use traits::{
    DatabaseClassStore, DatabaseEndpointStore, EventType, Store, StoreResult,
    VirtualDatabaseStore, WatchEvent, WatchStore,
};
