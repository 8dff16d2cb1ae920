//! Seeding the store from YAML manifests

use super::traits::{Store, StoreResult};
use crate::error::ControllerResult;
use pisa_types::{CodecTable, Object, Resource};
use std::path::{Path, PathBuf};

/// Write one decoded object into the store, creating or replacing it.
pub async fn apply_object(store: &dyn Store, object: Object) -> StoreResult<Object> {
    Ok(match object {
        Object::VirtualDatabase(vdb) => store.apply_virtual_database(vdb).await?.into_object(),
        Object::DatabaseClass(class) => store.apply_database_class(class).await?.into_object(),
        Object::DatabaseEndpoint(mut endpoint) => {
            let stored = match store.get_database_endpoint(&endpoint.key()).await {
                Ok(existing) => {
                    endpoint.metadata.resource_version = existing.metadata.resource_version;
                    store.update_database_endpoint(endpoint).await?
                }
                Err(e) if e.is_not_found() => store.create_database_endpoint(endpoint).await?,
                Err(e) => return Err(e),
            };
            stored.into_object()
        }
    })
}

/// Load a manifest file, or every `.yaml` / `.yml` file of a directory in
/// name order. Returns the number of objects applied.
pub async fn load_manifests(
    store: &dyn Store,
    codecs: &CodecTable,
    path: &Path,
) -> ControllerResult<usize> {
    let mut count = 0;

    for file in manifest_files(path).await? {
        let text = tokio::fs::read_to_string(&file).await?;
        let objects = codecs.decode_yaml(&text)?;

        tracing::info!(file = %file.display(), objects = objects.len(), "Loading manifests");

        for object in objects {
            let kind = object.kind();
            let key = object.key();
            apply_object(store, object).await?;
            tracing::debug!(%kind, %key, "Applied manifest object");
            count += 1;
        }
    }

    Ok(count)
}

async fn manifest_files(path: &Path) -> ControllerResult<Vec<PathBuf>> {
    if !tokio::fs::metadata(path).await?.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        let is_yaml = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if is_yaml {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DatabaseClassStore, InMemoryStore, VirtualDatabaseStore};
    use pisa_types::ObjectKey;
    use std::sync::Arc;

    const CLASS: &str = r#"
apiVersion: database-mesh.io/v1alpha1
kind: DatabaseClass
metadata:
  name: rds-mysql
  namespace: ns
spec:
  provisioner: AWSRdsInstance
  engine:
    name: mysql
    version: "8.0"
  defaultMasterUsername: admin
"#;

    const VDB: &str = r#"
apiVersion: database-mesh.io/v1alpha1
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
"#;

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01-class.yaml"), CLASS).unwrap();
        std::fs::write(dir.path().join("02-vdb.yml"), VDB).unwrap();
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let codecs = Arc::new(CodecTable::standard());
        let store = InMemoryStore::new(codecs.clone());

        let count = load_manifests(&store, &codecs, dir.path()).await.unwrap();
        assert_eq!(count, 2);

        let key = ObjectKey::new("ns", "app1");
        assert!(store.get_virtual_database(&key).await.is_ok());
        assert!(store
            .get_database_class(&key.sibling("rds-mysql"))
            .await
            .unwrap()
            .is_cloud_managed());
    }

    #[tokio::test]
    async fn test_reloading_replaces_objects() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vdb.yaml");
        std::fs::write(&file, VDB).unwrap();

        let codecs = Arc::new(CodecTable::standard());
        let store = InMemoryStore::new(codecs.clone());

        load_manifests(&store, &codecs, &file).await.unwrap();
        load_manifests(&store, &codecs, &file).await.unwrap();

        let vdbs = store.list_virtual_databases().await.unwrap();
        assert_eq!(vdbs.len(), 1);
        assert_eq!(vdbs[0].metadata.resource_version, 2);
    }
}
