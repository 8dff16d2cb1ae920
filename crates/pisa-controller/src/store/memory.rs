//! In-memory store implementation
//!
//! Objects are held in encoded form and decoded on every read, so callers
//! always get an independent copy and the codec table is the single source of
//! truth for the wire format.

use super::traits::*;
use crate::error::StoreError;
use async_trait::async_trait;
use pisa_types::{
    CodecTable, DatabaseClass, DatabaseEndpoint, Kind, ObjectKey, Resource, VirtualDatabase,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

type StoreKey = (Kind, ObjectKey);

#[derive(Debug)]
struct StoredObject {
    bytes: Vec<u8>,
    resource_version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<StoreKey, StoredObject>,
    /// owner → dependents
    dependents: HashMap<StoreKey, BTreeSet<StoreKey>>,
    last_version: u64,
}

/// In-memory desired-state store
#[derive(Debug)]
pub struct InMemoryStore {
    codecs: Arc<CodecTable>,
    inner: RwLock<Inner>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    /// Create a store that encodes objects with `codecs`
    pub fn new(codecs: Arc<CodecTable>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            codecs,
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    async fn get<R: Resource>(&self, key: &ObjectKey) -> StoreResult<R> {
        let inner = self.inner.read().await;
        let stored = inner
            .objects
            .get(&(R::KIND, key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                kind: R::KIND,
                key: key.clone(),
            })?;
        Ok(self.codecs.decode_as::<R>(&stored.bytes)?)
    }

    async fn list<R: Resource>(&self) -> StoreResult<Vec<R>> {
        let inner = self.inner.read().await;
        let mut keys: Vec<_> = inner
            .objects
            .keys()
            .filter(|(kind, _)| *kind == R::KIND)
            .collect();
        keys.sort();

        keys.into_iter()
            .map(|k| {
                self.codecs
                    .decode_as::<R>(&inner.objects[k].bytes)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn create<R: Resource>(&self, resource: R) -> StoreResult<R> {
        let mut inner = self.inner.write().await;
        self.create_locked(&mut inner, resource)
    }

    async fn update<R: Resource>(&self, resource: R) -> StoreResult<R> {
        let mut inner = self.inner.write().await;
        self.update_locked(&mut inner, resource)
    }

    /// Create, or update when present. A zero resource version overwrites
    /// unconditionally; any other must match.
    async fn apply<R: Resource>(&self, mut resource: R) -> StoreResult<R> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .objects
            .get(&(R::KIND, resource.key()))
            .map(|s| s.resource_version);

        match existing {
            None => self.create_locked(&mut inner, resource),
            Some(version) => {
                if resource.metadata().resource_version == 0 {
                    resource.metadata_mut().resource_version = version;
                }
                self.update_locked(&mut inner, resource)
            }
        }
    }

    fn create_locked<R: Resource>(&self, inner: &mut Inner, resource: R) -> StoreResult<R> {
        let key = resource.key();
        if inner.objects.contains_key(&(R::KIND, key.clone())) {
            return Err(StoreError::AlreadyExists { kind: R::KIND, key });
        }
        self.write(inner, resource, EventType::Added)
    }

    fn update_locked<R: Resource>(&self, inner: &mut Inner, resource: R) -> StoreResult<R> {
        let key = resource.key();
        let actual = inner
            .objects
            .get(&(R::KIND, key.clone()))
            .map(|s| s.resource_version)
            .ok_or_else(|| StoreError::NotFound {
                kind: R::KIND,
                key: key.clone(),
            })?;

        let expected = resource.metadata().resource_version;
        if expected != actual {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                key,
                expected,
                actual,
            });
        }
        self.write(inner, resource, EventType::Modified)
    }

    fn write<R: Resource>(
        &self,
        inner: &mut Inner,
        mut resource: R,
        event_type: EventType,
    ) -> StoreResult<R> {
        let version = inner.last_version + 1;
        resource.metadata_mut().resource_version = version;

        let key = resource.key();
        let owner = resource.metadata().owner_key();
        let bytes = self.codecs.encode(&resource.clone().into_object())?;

        inner.last_version = version;
        inner.objects.insert(
            (R::KIND, key.clone()),
            StoredObject {
                bytes,
                resource_version: version,
            },
        );
        if let Some(owner) = &owner {
            inner
                .dependents
                .entry(owner.clone())
                .or_default()
                .insert((R::KIND, key.clone()));
        }

        tracing::debug!(kind = %R::KIND, key = %key, version, "Stored object");

        // No subscribers is fine
        let _ = self.events.send(WatchEvent {
            event_type,
            kind: R::KIND,
            key,
            owner,
            resource_version: version,
        });

        Ok(resource)
    }
}

#[async_trait]
impl VirtualDatabaseStore for InMemoryStore {
    async fn get_virtual_database(&self, key: &ObjectKey) -> StoreResult<VirtualDatabase> {
        self.get(key).await
    }

    async fn list_virtual_databases(&self) -> StoreResult<Vec<VirtualDatabase>> {
        self.list().await
    }

    async fn apply_virtual_database(&self, vdb: VirtualDatabase) -> StoreResult<VirtualDatabase> {
        self.apply(vdb).await
    }
}

#[async_trait]
impl DatabaseClassStore for InMemoryStore {
    async fn get_database_class(&self, key: &ObjectKey) -> StoreResult<DatabaseClass> {
        self.get(key).await
    }

    async fn apply_database_class(&self, class: DatabaseClass) -> StoreResult<DatabaseClass> {
        self.apply(class).await
    }
}

#[async_trait]
impl DatabaseEndpointStore for InMemoryStore {
    async fn get_database_endpoint(&self, key: &ObjectKey) -> StoreResult<DatabaseEndpoint> {
        self.get(key).await
    }

    async fn create_database_endpoint(
        &self,
        endpoint: DatabaseEndpoint,
    ) -> StoreResult<DatabaseEndpoint> {
        self.create(endpoint).await
    }

    async fn update_database_endpoint(
        &self,
        endpoint: DatabaseEndpoint,
    ) -> StoreResult<DatabaseEndpoint> {
        self.update(endpoint).await
    }
}

#[async_trait]
impl WatchStore for InMemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    async fn dependents_of(
        &self,
        kind: Kind,
        owner: &ObjectKey,
    ) -> StoreResult<Vec<(Kind, ObjectKey)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .dependents
            .get(&(kind, owner.clone()))
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default())
    }
}

impl Store for InMemoryStore {}
