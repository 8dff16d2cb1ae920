//! Resource handlers
//!
//! Objects are exchanged in manifest form (`apiVersion`, `kind`, `metadata`,
//! `spec`). DatabaseEndpoints are written only by the controller and are
//! read-only here.

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::store::{
    apply_object, DatabaseClassStore, DatabaseEndpointStore, VirtualDatabaseStore, WatchStore,
};
use axum::{
    extract::{Path, State},
    Json,
};
use pisa_types::{Kind, Object, ObjectKey, Resource, API_VERSION};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub api_version: &'static str,
    pub kind: String,
    pub items: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct DependentRef {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

fn manifest(state: &AppState, object: &Object) -> ApiResult<Value> {
    state
        .codecs
        .to_manifest(object)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Decode a PUT body and check it names the object in the path
fn decode_body(state: &AppState, kind: Kind, key: &ObjectKey, body: Value) -> ApiResult<Object> {
    let object = state
        .codecs
        .from_manifest(body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if object.kind() != kind {
        return Err(ApiError::BadRequest(format!(
            "expected kind {}, got {}",
            kind,
            object.kind()
        )));
    }
    if &object.key() != key {
        return Err(ApiError::BadRequest(format!(
            "object {} does not match path {}",
            object.key(),
            key
        )));
    }
    Ok(object)
}

async fn put(state: &AppState, kind: Kind, key: ObjectKey, body: Value) -> ApiResult<Json<Value>> {
    let object = decode_body(state, kind, &key, body)?;
    let stored = apply_object(state.store.as_ref(), object).await?;

    tracing::info!(%kind, %key, version = stored.metadata().resource_version, "Applied object");
    Ok(Json(manifest(state, &stored)?))
}

/// List all VirtualDatabases across namespaces
pub async fn list_virtual_databases(State(state): State<AppState>) -> ApiResult<Json<ListResponse>> {
    let items = state
        .store
        .list_virtual_databases()
        .await?
        .into_iter()
        .map(|vdb| manifest(&state, &vdb.into_object()))
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(ListResponse {
        api_version: API_VERSION,
        kind: "VirtualDatabaseList".to_string(),
        items,
    }))
}

pub async fn get_virtual_database(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let vdb = state
        .store
        .get_virtual_database(&ObjectKey::new(namespace, name))
        .await?;
    Ok(Json(manifest(&state, &vdb.into_object())?))
}

/// Create or update a VirtualDatabase
pub async fn put_virtual_database(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    put(&state, Kind::VirtualDatabase, ObjectKey::new(namespace, name), body).await
}

/// Objects owned by a VirtualDatabase
pub async fn list_dependents(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<Vec<DependentRef>>> {
    let owner = ObjectKey::new(namespace, name);
    let dependents = state
        .store
        .dependents_of(Kind::VirtualDatabase, &owner)
        .await?
        .into_iter()
        .map(|(kind, key)| DependentRef {
            kind,
            namespace: key.namespace,
            name: key.name,
        })
        .collect();

    Ok(Json(dependents))
}

pub async fn get_database_class(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let class = state
        .store
        .get_database_class(&ObjectKey::new(namespace, name))
        .await?;
    Ok(Json(manifest(&state, &class.into_object())?))
}

/// Create or update a DatabaseClass
pub async fn put_database_class(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    put(&state, Kind::DatabaseClass, ObjectKey::new(namespace, name), body).await
}

pub async fn get_database_endpoint(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let endpoint = state
        .store
        .get_database_endpoint(&ObjectKey::new(namespace, name))
        .await?;
    Ok(Json(manifest(&state, &endpoint.into_object())?))
}
