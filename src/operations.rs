use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::Result;
use crate::models::{
    Changelog, CreateTwigletPayload, Link, Node, OrgModel, OrgModelSummary, PatchTwigletPayload,
    Twiglet, TwigletSummary, UpdateTwigletPayload,
};
use crate::org_models;
use crate::revision::CompositeRevision;
use crate::store::DocumentStore;
use crate::tenant::TenantContext;

/// Tool-friendly high-level twiglet actions.
///
/// Callers must provide a trusted `actor` sourced from validated session
/// state, not from tool arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TwigletOperation {
    List,
    Get {
        name: String,
    },
    Create {
        payload: CreateTwigletPayload,
    },
    Extend {
        name: String,
        payload: ExtendTwigletPayload,
    },
    Replace {
        name: String,
        payload: UpdateTwigletPayload,
    },
    Patch {
        name: String,
        payload: PatchTwigletPayload,
    },
    Changelog {
        name: String,
    },
    Delete {
        name: String,
    },
    ListModels,
    GetModel {
        name: String,
    },
}

/// Nodes and links appended to a twiglet at a known revision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendTwigletPayload {
    pub revision: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    pub commit_message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TwigletOperationResult {
    Twiglet { twiglet: Box<Twiglet> },
    Twiglets { items: Vec<TwigletSummary> },
    Changelog { changelog: Changelog },
    Model { model: OrgModel },
    Models { items: Vec<OrgModelSummary> },
    Deleted,
}

pub struct TwigletOperations<S> {
    store: Arc<S>,
}

impl<S> Clone for TwigletOperations<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> TwigletOperations<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub async fn execute(
        &self,
        actor: &str,
        tenant: &TenantContext,
        operation: TwigletOperation,
    ) -> Result<TwigletOperationResult> {
        let store = self.store.as_ref();
        match operation {
            TwigletOperation::List => {
                let items = db::list_twiglets(store, tenant).await?;
                Ok(TwigletOperationResult::Twiglets { items })
            }
            TwigletOperation::Get { name } => {
                let twiglet = db::assemble(store, tenant, &name).await?;
                Ok(TwigletOperationResult::Twiglet {
                    twiglet: Box::new(twiglet),
                })
            }
            TwigletOperation::Create { payload } => {
                let twiglet = db::create_twiglet(store, tenant, actor, payload).await?;
                Ok(TwigletOperationResult::Twiglet {
                    twiglet: Box::new(twiglet),
                })
            }
            TwigletOperation::Extend { name, payload } => {
                let twiglet = self.extend_twiglet(actor, tenant, &name, payload).await?;
                Ok(TwigletOperationResult::Twiglet {
                    twiglet: Box::new(twiglet),
                })
            }
            TwigletOperation::Replace { name, payload } => {
                let twiglet = db::update_twiglet(store, tenant, &name, actor, payload).await?;
                Ok(TwigletOperationResult::Twiglet {
                    twiglet: Box::new(twiglet),
                })
            }
            TwigletOperation::Patch { name, payload } => {
                let twiglet = db::patch_twiglet(store, tenant, &name, actor, payload).await?;
                Ok(TwigletOperationResult::Twiglet {
                    twiglet: Box::new(twiglet),
                })
            }
            TwigletOperation::Changelog { name } => {
                let changelog = db::get_changelog(store, tenant, &name).await?;
                Ok(TwigletOperationResult::Changelog { changelog })
            }
            TwigletOperation::Delete { name } => {
                db::delete_twiglet(store, tenant, &name).await?;
                tracing::info!(actor, twiglet = %name, "twiglet deleted via operation");
                Ok(TwigletOperationResult::Deleted)
            }
            TwigletOperation::ListModels => {
                let items = org_models::list_models(store, tenant).await?;
                Ok(TwigletOperationResult::Models { items })
            }
            TwigletOperation::GetModel { name } => {
                let model = org_models::get_model(store, tenant, &name).await?;
                Ok(TwigletOperationResult::Model { model })
            }
        }
    }

    /// Appends nodes and links. The write is still guarded by the caller's
    /// composite revision, so concurrent edits surface as conflicts. A
    /// malformed revision is rejected before the twiglet is read.
    pub async fn extend_twiglet(
        &self,
        actor: &str,
        tenant: &TenantContext,
        name: &str,
        payload: ExtendTwigletPayload,
    ) -> Result<Twiglet> {
        CompositeRevision::parse(&payload.revision)?;
        let store = self.store.as_ref();
        let existing = db::assemble(store, tenant, name).await?;
        let update = merge_additions(existing, payload);
        db::update_twiglet(store, tenant, name, actor, update).await
    }
}

fn merge_additions(existing: Twiglet, payload: ExtendTwigletPayload) -> UpdateTwigletPayload {
    let mut nodes = existing.nodes;
    nodes.extend(payload.nodes);
    let mut links = existing.links;
    links.extend(payload.links);

    UpdateTwigletPayload {
        name: existing.name,
        description: Some(existing.description),
        revision: payload.revision,
        nodes,
        links,
        commit_message: payload.commit_message,
        do_replacement: false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{TwigletOperation, TwigletOperationResult, TwigletOperations};
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use crate::tenant::TenantContext;

    fn operation(value: serde_json::Value) -> TwigletOperation {
        serde_json::from_value(value).expect("operation should deserialize")
    }

    #[tokio::test]
    async fn extend_appends_and_validates() {
        let ops = TwigletOperations::new(Arc::new(MemoryStore::new()));
        let tenant = TenantContext::shared();
        let created = ops
            .execute(
                "alice",
                &tenant,
                operation(json!({
                    "operation": "create",
                    "payload": { "name": "T", "commitMessage": "initial" }
                })),
            )
            .await
            .expect("create");
        let TwigletOperationResult::Twiglet { twiglet } = created else {
            panic!("expected twiglet result");
        };

        let extended = ops
            .execute(
                "alice",
                &tenant,
                operation(json!({
                    "operation": "extend",
                    "name": "T",
                    "payload": {
                        "revision": twiglet.revision.to_string(),
                        "nodes": [
                            { "id": "a", "name": "a", "type": "ent1" },
                            { "id": "b", "name": "b", "type": "ent1" }
                        ],
                        "links": [{ "id": "l1", "source": "a", "target": "b" }],
                        "commitMessage": "add a and b"
                    }
                })),
            )
            .await
            .expect("extend");
        let TwigletOperationResult::Twiglet { twiglet: extended } = extended else {
            panic!("expected twiglet result");
        };
        assert_eq!(extended.nodes.len(), 2);
        assert_eq!(extended.links.len(), 1);

        let err = ops
            .execute(
                "alice",
                &tenant,
                operation(json!({
                    "operation": "extend",
                    "name": "T",
                    "payload": {
                        "revision": extended.revision.to_string(),
                        "links": [{ "id": "l2", "source": "a", "target": "ghost" }],
                        "commitMessage": "dangling"
                    }
                })),
            )
            .await
            .expect_err("dangling link");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn list_and_delete() {
        let ops = TwigletOperations::new(Arc::new(MemoryStore::new()));
        let tenant = TenantContext::shared();
        ops.execute(
            "alice",
            &tenant,
            operation(json!({
                "operation": "create",
                "payload": { "name": "T", "commitMessage": "initial" }
            })),
        )
        .await
        .expect("create");

        let deleted = ops
            .execute(
                "alice",
                &tenant,
                operation(json!({ "operation": "delete", "name": "T" })),
            )
            .await
            .expect("delete");
        assert!(matches!(deleted, TwigletOperationResult::Deleted));

        let listed = ops
            .execute("alice", &tenant, operation(json!({ "operation": "list" })))
            .await
            .expect("list");
        let TwigletOperationResult::Twiglets { items } = listed else {
            panic!("expected twiglet list");
        };
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn extend_rejects_malformed_revision_before_reading() {
        let store = Arc::new(MemoryStore::new());
        let ops = TwigletOperations::new(Arc::clone(&store));
        let tenant = TenantContext::shared();

        for name in ["ghost", "T"] {
            let err = ops
                .execute(
                    "alice",
                    &tenant,
                    operation(json!({
                        "operation": "extend",
                        "name": name,
                        "payload": {
                            "revision": "onlyonepart",
                            "commitMessage": "add"
                        }
                    })),
                )
                .await
                .expect_err("malformed revision");
            assert_eq!(err.kind, ErrorKind::InvalidInput);
            assert_eq!(err.code, "malformed_revision");
            assert_eq!(store.op_counts().reads, 0);
        }
    }
}
