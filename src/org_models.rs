//! Organisation-wide models that new twiglets snapshot their entities from.

use anyhow::anyhow;

use crate::db::{all_docs_or_empty, find_named};
use crate::error::{ConflictState, LibError, Result};
use crate::models::{
    CreateModelPayload, ModelRecord, OrgModel, OrgModelSummary, UpdateModelPayload,
    required_name,
};
use crate::store::{Document, DocumentStore, DocumentWrite, StoreError};
use crate::tenant::TenantContext;

fn model_not_found(name: &str) -> LibError {
    LibError::not_found("Model not found", anyhow!("no model named '{}'", name))
}

fn to_model(doc: &Document, record: ModelRecord) -> OrgModel {
    OrgModel {
        name: record.name,
        revision: doc.rev.clone(),
        entities: record.entities,
    }
}

fn encode(record: &ModelRecord) -> Result<serde_json::Value> {
    serde_json::to_value(record)
        .map_err(|err| LibError::unknown("Failed to encode model", anyhow!(err)))
}

async fn find_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<Option<(Document, ModelRecord)>> {
    find_named(store, &tenant.org_models_db(), name, |record: &ModelRecord| {
        record.name.as_str()
    })
    .await
}

pub async fn list_models<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
) -> Result<Vec<OrgModelSummary>> {
    let mut names: Vec<OrgModelSummary> = all_docs_or_empty(store, &tenant.org_models_db())
        .await?
        .iter()
        .filter_map(|doc| doc.decode::<ModelRecord>().ok())
        .map(|record| OrgModelSummary { name: record.name })
        .collect();
    names.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(names)
}

pub async fn get_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<OrgModel> {
    let (doc, record) = find_model(store, tenant, name)
        .await?
        .ok_or_else(|| model_not_found(name))?;
    Ok(to_model(&doc, record))
}

pub async fn create_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    payload: CreateModelPayload,
) -> Result<OrgModel> {
    let name = required_name(&payload.name, "Model name is required")?;
    let db = tenant.org_models_db();
    store
        .create_db(&db)
        .await
        .map_err(|err| LibError::from_store("Failed to prepare model storage", "Model not found", err))?;

    if find_model(store, tenant, &name).await?.is_some() {
        return Err(LibError::conflict(
            "A model with that name already exists",
            anyhow!("model name '{}' is taken", name),
        ));
    }

    let record = ModelRecord {
        name,
        entities: payload.entities,
    };
    let id = uuid::Uuid::new_v4().to_string();
    store
        .put(&db, DocumentWrite::create(&id, encode(&record)?))
        .await
        .map_err(|err| LibError::from_store("Failed to create model", "Model not found", err))?;

    tracing::info!(model = %record.name, "model created");
    get_model(store, tenant, &record.name).await
}

/// Replaces a model's entities (and optionally its name), guarded by the
/// model document's revision.
pub async fn update_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
    payload: UpdateModelPayload,
) -> Result<OrgModel> {
    let (doc, record) = find_model(store, tenant, name)
        .await?
        .ok_or_else(|| model_not_found(name))?;

    if payload.revision != doc.rev {
        return Err(LibError::revision_conflict(
            ConflictState::Model(Box::new(to_model(&doc, record))),
            anyhow!("model '{}' revision {} is stale", name, payload.revision),
        ));
    }

    let new_name = match payload.name {
        Some(raw) => required_name(&raw, "Model name is required")?,
        None => record.name.clone(),
    };
    if new_name != record.name && find_model(store, tenant, &new_name).await?.is_some() {
        return Err(LibError::conflict(
            "A model with that name already exists",
            anyhow!("model name '{}' is taken", new_name),
        ));
    }

    let updated = ModelRecord {
        name: new_name,
        entities: payload.entities,
    };
    let db = tenant.org_models_db();
    match store
        .put(&db, DocumentWrite::replace(&doc, encode(&updated)?))
        .await
    {
        Ok(_) => {}
        Err(StoreError::Conflict { .. }) => {
            let current = get_model(store, tenant, name).await?;
            return Err(LibError::revision_conflict(
                ConflictState::Model(Box::new(current)),
                anyhow!("model '{}' changed during write", name),
            ));
        }
        Err(err) => {
            return Err(LibError::from_store(
                "Failed to update model",
                "Model not found",
                err,
            ));
        }
    }

    get_model(store, tenant, &updated.name).await
}

pub async fn delete_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<()> {
    let (doc, _) = find_model(store, tenant, name)
        .await?
        .ok_or_else(|| model_not_found(name))?;
    store
        .remove(&tenant.org_models_db(), &doc.id, &doc.rev)
        .await
        .map_err(|err| LibError::from_store("Failed to delete model", "Model not found", err))?;
    tracing::info!(model = name, "model deleted");
    Ok(())
}
