use anyhow::anyhow;
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::error::{ConflictState, ErrorKind, LibError, Result};
use crate::models::{
    Changelog, CommitEntry, CreateTwigletPayload, Link, ModelEntities, Node, PatchTwigletPayload,
    Twiglet, TwigletDefinition, TwigletId, TwigletInfo, TwigletSummary, UpdateTwigletPayload,
};
use crate::org_models;
use crate::revision::CompositeRevision;
use crate::saga::{SagaFailure, WriteSaga};
use crate::store::{Document, DocumentStore, StoreError, record_body};
use crate::tenant::TenantContext;

pub const NODES_DOC: &str = "nodes";
pub const LINKS_DOC: &str = "links";
pub const CHANGELOG_DOC: &str = "changelog";
pub const MODEL_DOC: &str = "model";
pub const VIEWS_DOC: &str = "views";
pub const EVENTS_DOC: &str = "events";
pub const SEQUENCES_DOC: &str = "sequences";

/// The raw documents behind one twiglet, as read in a single pass.
#[derive(Debug, Clone)]
pub struct TwigletDocs {
    pub id: TwigletId,
    pub info: Document,
    pub nodes: Document,
    pub links: Document,
    pub changelog: Document,
}

impl TwigletDocs {
    pub fn revision(&self) -> CompositeRevision {
        CompositeRevision::new(&self.info.rev, &self.nodes.rev, &self.links.rev)
    }

    pub fn info(&self) -> Result<TwigletInfo> {
        self.info.decode().map_err(LibError::from)
    }

    pub fn changelog_entries(&self) -> Result<Vec<CommitEntry>> {
        self.changelog.data().map_err(LibError::from)
    }

    pub fn to_twiglet(&self) -> Result<Twiglet> {
        let info = self.info()?;
        let nodes: Vec<Node> = self.nodes.data()?;
        let links: Vec<Link> = self.links.data()?;
        let latest_commit = self.changelog_entries()?.into_iter().next();

        Ok(Twiglet {
            id: self.id,
            name: info.name,
            description: info.description,
            revision: self.revision(),
            nodes,
            links,
            latest_commit,
        })
    }
}

pub fn twiglet_db(tenant: &TenantContext, id: TwigletId) -> String {
    tenant.db_name(&id.to_string())
}

fn store_err(public: &'static str, err: StoreError) -> LibError {
    LibError::from_store(public, "Twiglet not found", err)
}

fn twiglet_not_found(name: &str) -> LibError {
    LibError::not_found(
        "Twiglet not found",
        anyhow!("no twiglet named '{}'", name),
    )
}

/// Every document in `db`; a database that was never created reads as empty.
pub(crate) async fn all_docs_or_empty<S: DocumentStore>(
    store: &S,
    db: &str,
) -> Result<Vec<Document>> {
    match store.all_docs(db, None).await {
        Ok(docs) => Ok(docs),
        Err(StoreError::DatabaseNotFound { .. }) => Ok(Vec::new()),
        Err(err) => Err(store_err("Failed to list documents", err)),
    }
}

/// Finds the document whose body decodes to a record with the exact name.
pub(crate) async fn find_named<S, T, F>(
    store: &S,
    db: &str,
    name: &str,
    name_of: F,
) -> Result<Option<(Document, T)>>
where
    S: DocumentStore,
    T: DeserializeOwned,
    F: Fn(&T) -> &str,
{
    for doc in all_docs_or_empty(store, db).await? {
        let Ok(record) = doc.decode::<T>() else {
            tracing::warn!(db, doc = %doc.id, "skipping undecodable lookup document");
            continue;
        };
        if name_of(&record) == name {
            return Ok(Some((doc, record)));
        }
    }
    Ok(None)
}

async fn find_info<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<Option<(TwigletId, Document)>> {
    let found = find_named(store, &tenant.twiglets_db(), name, |info: &TwigletInfo| {
        info.name.as_str()
    })
    .await?;

    let Some((doc, _)) = found else {
        return Ok(None);
    };
    let id = doc.id.parse::<TwigletId>().map_err(|err| {
        LibError::database(
            "Twiglet lookup is corrupt",
            anyhow!("lookup document id {} is not a uuid: {}", doc.id, err),
        )
    })?;
    Ok(Some((id, doc)))
}

pub(crate) async fn require_info<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<(TwigletId, Document)> {
    find_info(store, tenant, name)
        .await?
        .ok_or_else(|| twiglet_not_found(name))
}

async fn ensure_name_available<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
    owner: Option<TwigletId>,
) -> Result<()> {
    match find_info(store, tenant, name).await? {
        Some((id, _)) if Some(id) != owner => Err(LibError::conflict(
            "A twiglet with that name already exists",
            anyhow!("twiglet name '{}' is taken by {}", name, id),
        )),
        _ => Ok(()),
    }
}

async fn load_docs<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    id: TwigletId,
    info: Document,
) -> Result<TwigletDocs> {
    let db = twiglet_db(tenant, id);
    let mut docs = store
        .all_docs(&db, Some(&[NODES_DOC, LINKS_DOC, CHANGELOG_DOC][..]))
        .await
        .map_err(|err| match err {
            StoreError::NotFound { .. } | StoreError::DatabaseNotFound { .. } => LibError::not_found(
                "Twiglet records are missing",
                anyhow!("twiglet {} is missing sub-records: {}", id, err),
            ),
            other => store_err("Failed to load twiglet", other),
        })?
        .into_iter();

    let (Some(nodes), Some(links), Some(changelog)) = (docs.next(), docs.next(), docs.next())
    else {
        return Err(LibError::database(
            "Failed to load twiglet",
            anyhow!("store returned too few documents for twiglet {}", id),
        ));
    };

    Ok(TwigletDocs {
        id,
        info,
        nodes,
        links,
        changelog,
    })
}

pub async fn load_twiglet_docs<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<TwigletDocs> {
    let (id, info) = require_info(store, tenant, name).await?;
    load_docs(store, tenant, id, info).await
}

/// Reads the info, nodes, links and changelog records of `name` and
/// composes them into one resource with a composite revision.
pub async fn assemble<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<Twiglet> {
    load_twiglet_docs(store, tenant, name).await?.to_twiglet()
}

pub async fn list_twiglets<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
) -> Result<Vec<TwigletSummary>> {
    let mut summaries = Vec::new();
    for doc in all_docs_or_empty(store, &tenant.twiglets_db()).await? {
        let (Ok(id), Ok(info)) = (doc.id.parse::<TwigletId>(), doc.decode::<TwigletInfo>()) else {
            tracing::warn!(doc = %doc.id, "skipping malformed twiglet lookup document");
            continue;
        };
        summaries.push(TwigletSummary {
            id,
            name: info.name,
            description: info.description,
        });
    }
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(summaries)
}

pub async fn get_changelog<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<Changelog> {
    let (id, _) = require_info(store, tenant, name).await?;
    let doc = store
        .get(&twiglet_db(tenant, id), CHANGELOG_DOC)
        .await
        .map_err(|err| store_err("Failed to load changelog", err))?;
    Ok(Changelog {
        changelog: doc.data()?,
    })
}

pub async fn create_twiglet<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    user: &str,
    payload: CreateTwigletPayload,
) -> Result<Twiglet> {
    let payload = payload.normalize()?;
    let lookup_db = tenant.twiglets_db();
    store
        .create_db(&lookup_db)
        .await
        .map_err(|err| store_err("Failed to prepare twiglet storage", err))?;
    ensure_name_available(store, tenant, &payload.name, None).await?;

    let (nodes, links, entities) = match (&payload.model, &payload.clone_twiglet) {
        (Some(model_name), _) => {
            let model = org_models::get_model(store, tenant, model_name)
                .await
                .map_err(|err| {
                    if err.kind == ErrorKind::NotFound {
                        LibError::invalid(
                            "Model not found",
                            anyhow!("create references unknown model '{}'", model_name),
                        )
                    } else {
                        err
                    }
                })?;
            (Vec::new(), Vec::new(), model.entities)
        }
        (None, Some(source)) => {
            let docs = load_twiglet_docs(store, tenant, source).await?;
            let model_doc = store
                .get(&twiglet_db(tenant, docs.id), MODEL_DOC)
                .await
                .map_err(|err| store_err("Failed to load twiglet model", err))?;
            let entities: ModelEntities = model_doc.data()?;
            let nodes: Vec<Node> = docs.nodes.data()?;
            let links: Vec<Link> = docs.links.data()?;
            (nodes, links, entities)
        }
        (None, None) => (Vec::new(), Vec::new(), ModelEntities::new()),
    };

    let id = TwigletId::new();
    let db = twiglet_db(tenant, id);
    store
        .create_db(&db)
        .await
        .map_err(|err| store_err("Failed to create twiglet storage", err))?;

    let info = TwigletInfo {
        name: payload.name.clone(),
        description: payload.description.clone().unwrap_or_default(),
    };
    let commit = CommitEntry::new(&payload.commit_message, user, Utc::now());
    let empty: Vec<serde_json::Value> = Vec::new();
    let info_body = serde_json::to_value(&info)
        .map_err(|err| LibError::unknown("Failed to encode twiglet", anyhow!(err)))?;

    let saga = WriteSaga::new("create_twiglet")
        .create("info", &lookup_db, &id.to_string(), info_body)
        .create("nodes", &db, NODES_DOC, record_body(&nodes)?)
        .create("links", &db, LINKS_DOC, record_body(&links)?)
        .create("changelog", &db, CHANGELOG_DOC, record_body(&vec![commit])?)
        .create("model", &db, MODEL_DOC, record_body(&entities)?)
        .create("views", &db, VIEWS_DOC, record_body(&empty)?)
        .create("events", &db, EVENTS_DOC, record_body(&empty)?)
        .create("sequences", &db, SEQUENCES_DOC, record_body(&empty)?);

    if let Err(failure) = saga.commit(store).await {
        if let Err(err) = store.destroy_db(&db).await {
            tracing::error!(twiglet = %id, error = %err, "failed to destroy partially created twiglet database");
        }
        return Err(saga_error("Failed to create twiglet", failure));
    }

    tracing::info!(twiglet = %id, name = %payload.name, "twiglet created");
    assemble(store, tenant, &payload.name).await
}

/// Full replacement of info, nodes and links guarded by the composite revision.
pub async fn update_twiglet<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
    user: &str,
    payload: UpdateTwigletPayload,
) -> Result<Twiglet> {
    let definition = payload.normalize()?;
    let current = load_twiglet_docs(store, tenant, name).await?;
    write_definition(store, tenant, current, user, definition).await
}

/// Like [`update_twiglet`], keeping current values for omitted fields.
pub async fn patch_twiglet<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
    user: &str,
    payload: PatchTwigletPayload,
) -> Result<Twiglet> {
    CompositeRevision::parse(&payload.revision)?;
    let current = load_twiglet_docs(store, tenant, name).await?;
    let definition = payload.merge_onto(&current.to_twiglet()?).normalize()?;
    write_definition(store, tenant, current, user, definition).await
}

async fn write_definition<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    current: TwigletDocs,
    user: &str,
    definition: TwigletDefinition,
) -> Result<Twiglet> {
    let current_revision = current.revision();
    if !definition.revision.matches(&current_revision) {
        return Err(LibError::revision_conflict(
            ConflictState::Twiglet(Box::new(current.to_twiglet()?)),
            anyhow!(
                "twiglet {} revision {} is stale, current {}",
                current.id,
                definition.revision,
                current_revision
            ),
        ));
    }

    if definition.name != current.info()?.name {
        ensure_name_available(store, tenant, &definition.name, Some(current.id)).await?;
    }

    let now = Utc::now();
    let mut changelog = current.changelog_entries()?;
    if definition.do_replacement {
        changelog.insert(0, CommitEntry::replacement_marker(user, now));
    }
    changelog.insert(0, CommitEntry::new(&definition.commit_message, user, now));

    let info = TwigletInfo {
        name: definition.name.clone(),
        description: definition.description.clone(),
    };
    let info_body = serde_json::to_value(&info)
        .map_err(|err| LibError::unknown("Failed to encode twiglet", anyhow!(err)))?;
    let db = twiglet_db(tenant, current.id);

    let saga = WriteSaga::new("update_twiglet")
        .replace("info", &tenant.twiglets_db(), &current.info, info_body)
        .replace("nodes", &db, &current.nodes, record_body(&definition.nodes)?)
        .replace("links", &db, &current.links, record_body(&definition.links)?)
        .replace("changelog", &db, &current.changelog, record_body(&changelog)?);

    if let Err(failure) = saga.commit(store).await {
        if failure.is_clean_conflict() {
            let info = store
                .get(&tenant.twiglets_db(), &current.id.to_string())
                .await
                .map_err(|err| store_err("Failed to reload twiglet", err))?;
            let latest = load_docs(store, tenant, current.id, info).await?.to_twiglet()?;
            return Err(LibError::revision_conflict(
                ConflictState::Twiglet(Box::new(latest)),
                anyhow!(
                    "twiglet {} changed during write: {}",
                    current.id,
                    failure.summary()
                ),
            ));
        }
        return Err(saga_error("Failed to update twiglet", failure));
    }

    tracing::info!(
        twiglet = %current.id,
        user,
        replacement = definition.do_replacement,
        "twiglet updated"
    );
    assemble(store, tenant, &definition.name).await
}

fn saga_error(public: &'static str, failure: SagaFailure) -> LibError {
    let source = anyhow!("saga {} failed: {}", failure.saga_id, failure.summary());
    if failure.inconsistency.is_some() {
        LibError::inconsistent("Twiglet storage is inconsistent; an operator has been notified", source)
    } else {
        LibError::database(public, source)
    }
}

pub async fn delete_twiglet<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    name: &str,
) -> Result<()> {
    let (id, info) = require_info(store, tenant, name).await?;
    store
        .remove(&tenant.twiglets_db(), &info.id, &info.rev)
        .await
        .map_err(|err| store_err("Failed to delete twiglet", err))?;

    match store.destroy_db(&twiglet_db(tenant, id)).await {
        Ok(()) | Err(StoreError::DatabaseNotFound { .. }) => {}
        Err(err) => {
            tracing::error!(twiglet = %id, error = %err, "twiglet unlisted but its records were not destroyed");
            return Err(LibError::inconsistent(
                "Twiglet was removed but its records could not be cleaned up",
                anyhow!("destroying twiglet {} database failed: {}", id, err),
            ));
        }
    }

    tracing::info!(twiglet = %id, name, "twiglet deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{assemble, create_twiglet, get_changelog, list_twiglets, update_twiglet};
    use crate::error::ErrorKind;
    use crate::models::{CreateTwigletPayload, Twiglet, UpdateTwigletPayload};
    use crate::store::MemoryStore;
    use crate::store::flaky::FlakyStore;
    use crate::tenant::TenantContext;

    fn create(name: &str) -> CreateTwigletPayload {
        CreateTwigletPayload {
            name: name.to_string(),
            description: Some("desc".to_string()),
            model: None,
            clone_twiglet: None,
            commit_message: "initial".to_string(),
        }
    }

    #[tokio::test]
    async fn created_twiglet_assembles_with_initial_commit() {
        let store = MemoryStore::new();
        let tenant = TenantContext::shared();
        let created = create_twiglet(&store, &tenant, "alice", create("T"))
            .await
            .expect("create");

        let twiglet = assemble(&store, &tenant, "T").await.expect("assemble");
        assert_eq!(created, twiglet);
        let commit = twiglet.latest_commit.expect("initial commit");
        assert_eq!(commit.message, "initial");
        assert_eq!(commit.user, "alice");
    }

    #[tokio::test]
    async fn name_lookup_is_case_sensitive() {
        let store = MemoryStore::new();
        let tenant = TenantContext::shared();
        create_twiglet(&store, &tenant, "alice", create("Twig"))
            .await
            .expect("create");

        let err = assemble(&store, &tenant, "twig")
            .await
            .expect_err("different case");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let store = MemoryStore::new();
        let tenant = TenantContext::shared();
        create_twiglet(&store, &tenant, "alice", create("T"))
            .await
            .expect("create");
        let err = create_twiglet(&store, &tenant, "alice", create("T"))
            .await
            .expect_err("duplicate");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.conflict.is_none());
    }

    #[tokio::test]
    async fn rename_into_existing_name_conflicts() {
        let store = MemoryStore::new();
        let tenant = TenantContext::shared();
        create_twiglet(&store, &tenant, "alice", create("A"))
            .await
            .expect("create A");
        let b = create_twiglet(&store, &tenant, "alice", create("B"))
            .await
            .expect("create B");

        let err = update_twiglet(
            &store,
            &tenant,
            "B",
            "alice",
            UpdateTwigletPayload {
                name: "A".to_string(),
                description: None,
                revision: b.revision.to_string(),
                nodes: vec![],
                links: vec![],
                commit_message: "rename".to_string(),
                do_replacement: false,
            },
        )
        .await
        .expect_err("name taken");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let names: Vec<_> = list_twiglets(&store, &tenant)
            .await
            .expect("list")
            .into_iter()
            .map(|summary| summary.name)
            .collect();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = MemoryStore::new();
        create_twiglet(&store, &TenantContext::new("acme"), "alice", create("T"))
            .await
            .expect("create");

        let err = assemble(&store, &TenantContext::new("globex"), "T")
            .await
            .expect_err("other tenant");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(
            store
                .database_names()
                .await
                .contains(&"acme_twiglets".to_string())
        );
    }

    fn replace_with_nodes(current: &Twiglet) -> UpdateTwigletPayload {
        UpdateTwigletPayload {
            name: "Renamed".to_string(),
            description: None,
            revision: current.revision.to_string(),
            nodes: vec![
                serde_json::from_value(json!({ "id": "a", "name": "a", "type": "ent1" }))
                    .expect("node"),
            ],
            links: vec![],
            commit_message: "add a".to_string(),
            do_replacement: false,
        }
    }

    #[tokio::test]
    async fn failed_write_rolls_back_and_reports_database_error() {
        let store = FlakyStore::new();
        let tenant = TenantContext::shared();
        let created = create_twiglet(&store, &tenant, "alice", create("T"))
            .await
            .expect("create");

        store.fail_put("links");
        let err = update_twiglet(&store, &tenant, "T", "alice", replace_with_nodes(&created))
            .await
            .expect_err("links write fails");
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(err.code, "database_error");

        let after = assemble(&store, &tenant, "T").await.expect("original name");
        assert_eq!(after.name, created.name);
        assert_eq!(after.description, created.description);
        assert!(after.nodes.is_empty());
        let changelog = get_changelog(&store, &tenant, "T").await.expect("changelog");
        assert_eq!(changelog.changelog.len(), 1);
        assert!(assemble(&store, &tenant, "Renamed").await.is_err());
    }

    #[tokio::test]
    async fn failed_rollback_reports_inconsistent_state() {
        let store = FlakyStore::new();
        let tenant = TenantContext::shared();
        let created = create_twiglet(&store, &tenant, "alice", create("T"))
            .await
            .expect("create");

        store.fail_put("links");
        // the nodes write lands, restoring it does not
        store.fail_put_after("nodes", 1);
        let err = update_twiglet(&store, &tenant, "T", "alice", replace_with_nodes(&created))
            .await
            .expect_err("links write fails");
        assert_eq!(err.kind, ErrorKind::Inconsistent);
        assert_eq!(err.code, "inconsistent_state");
    }
}
