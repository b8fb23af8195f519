//! Per-twiglet records that live beside nodes and links: the twiglet's
//! model copy, views, events and sequences. Each is one document guarded by
//! its own revision.

use anyhow::anyhow;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::db::{self, EVENTS_DOC, MODEL_DOC, SEQUENCES_DOC, VIEWS_DOC, twiglet_db};
use crate::error::{ConflictState, LibError, Result};
use crate::invariants;
use crate::models::{
    CreateEventPayload, Event, EventSummary, ModelEntities, Sequence, SequencePayload,
    TwigletModel, UpdateTwigletModelPayload, View, ViewPayload, ViewSummary, required_name,
};
use crate::saga::WriteSaga;
use crate::store::{Document, DocumentStore, DocumentWrite, StoreError, record_body};
use crate::tenant::TenantContext;

struct ListDoc<T> {
    db: String,
    doc: Document,
    items: Vec<T>,
}

async fn load_list<S, T>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    doc_id: &'static str,
) -> Result<ListDoc<T>>
where
    S: DocumentStore,
    T: DeserializeOwned,
{
    let (id, _) = db::require_info(store, tenant, twiglet).await?;
    let db = twiglet_db(tenant, id);
    let doc = store.get(&db, doc_id).await.map_err(|err| {
        LibError::from_store("Failed to load twiglet records", "Twiglet records are missing", err)
    })?;
    let items = doc.data()?;
    Ok(ListDoc { db, doc, items })
}

async fn save_list<S, T>(store: &S, list: &ListDoc<T>, items: &[T]) -> Result<()>
where
    S: DocumentStore,
    T: Serialize,
{
    let write = DocumentWrite::replace(&list.doc, record_body(&items)?);
    match store.put(&list.db, write).await {
        Ok(_) => Ok(()),
        Err(err @ StoreError::Conflict { .. }) => Err(LibError::conflict(
            "The twiglet was modified concurrently, please retry",
            anyhow!(err),
        )),
        Err(err) => Err(LibError::from_store(
            "Failed to save twiglet records",
            "Twiglet records are missing",
            err,
        )),
    }
}

fn name_taken(what: &'static str, name: &str) -> LibError {
    LibError::conflict(what, anyhow!("name '{}' already in use", name))
}

async fn load_model_doc<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
) -> Result<(String, Document)> {
    let (id, _) = db::require_info(store, tenant, twiglet).await?;
    let db = twiglet_db(tenant, id);
    let doc = store.get(&db, MODEL_DOC).await.map_err(|err| {
        LibError::from_store("Failed to load twiglet model", "Twiglet model is missing", err)
    })?;
    Ok((db, doc))
}

pub async fn get_twiglet_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
) -> Result<TwigletModel> {
    let (_, doc) = load_model_doc(store, tenant, twiglet).await?;
    Ok(TwigletModel {
        revision: doc.rev.clone(),
        entities: doc.data()?,
    })
}

/// Replaces the twiglet's model entities. Stale revisions get the current
/// model back with the conflict.
pub async fn update_twiglet_model<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    payload: UpdateTwigletModelPayload,
) -> Result<TwigletModel> {
    let (db, doc) = load_model_doc(store, tenant, twiglet).await?;

    if payload.revision != doc.rev {
        let entities: ModelEntities = doc.data()?;
        return Err(LibError::revision_conflict(
            ConflictState::TwigletModel(Box::new(TwigletModel {
                revision: doc.rev.clone(),
                entities,
            })),
            anyhow!(
                "twiglet '{}' model revision {} is stale",
                twiglet,
                payload.revision
            ),
        ));
    }

    let write = DocumentWrite::replace(&doc, record_body(&payload.entities)?);
    match store.put(&db, write).await {
        Ok(_) => {}
        Err(StoreError::Conflict { .. }) => {
            let current = get_twiglet_model(store, tenant, twiglet).await?;
            return Err(LibError::revision_conflict(
                ConflictState::TwigletModel(Box::new(current)),
                anyhow!("twiglet '{}' model changed during write", twiglet),
            ));
        }
        Err(err) => {
            return Err(LibError::from_store(
                "Failed to update twiglet model",
                "Twiglet model is missing",
                err,
            ));
        }
    }

    get_twiglet_model(store, tenant, twiglet).await
}

pub async fn list_views<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
) -> Result<Vec<ViewSummary>> {
    let list: ListDoc<View> = load_list(store, tenant, twiglet, VIEWS_DOC).await?;
    Ok(list
        .items
        .into_iter()
        .map(|view| ViewSummary {
            name: view.name,
            description: view.description,
        })
        .collect())
}

pub async fn get_view<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    view_name: &str,
) -> Result<View> {
    let list: ListDoc<View> = load_list(store, tenant, twiglet, VIEWS_DOC).await?;
    list.items
        .into_iter()
        .find(|view| view.name == view_name)
        .ok_or_else(|| {
            LibError::not_found("View not found", anyhow!("no view named '{}'", view_name))
        })
}

pub async fn create_view<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    payload: ViewPayload,
) -> Result<View> {
    let view = payload.into_view()?;
    let list: ListDoc<View> = load_list(store, tenant, twiglet, VIEWS_DOC).await?;
    if list.items.iter().any(|existing| existing.name == view.name) {
        return Err(name_taken("A view with that name already exists", &view.name));
    }

    let mut items = list.items.clone();
    items.push(view.clone());
    save_list(store, &list, &items).await?;
    Ok(view)
}

pub async fn update_view<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    view_name: &str,
    payload: ViewPayload,
) -> Result<View> {
    let view = payload.into_view()?;
    let list: ListDoc<View> = load_list(store, tenant, twiglet, VIEWS_DOC).await?;
    let Some(position) = list.items.iter().position(|existing| existing.name == view_name) else {
        return Err(LibError::not_found(
            "View not found",
            anyhow!("no view named '{}'", view_name),
        ));
    };
    if view.name != view_name && list.items.iter().any(|existing| existing.name == view.name) {
        return Err(name_taken("A view with that name already exists", &view.name));
    }

    let mut items = list.items.clone();
    items[position] = view.clone();
    save_list(store, &list, &items).await?;
    Ok(view)
}

pub async fn delete_view<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    view_name: &str,
) -> Result<()> {
    let list: ListDoc<View> = load_list(store, tenant, twiglet, VIEWS_DOC).await?;
    let items: Vec<View> = list
        .items
        .iter()
        .filter(|view| view.name != view_name)
        .cloned()
        .collect();
    if items.len() == list.items.len() {
        return Err(LibError::not_found(
            "View not found",
            anyhow!("no view named '{}'", view_name),
        ));
    }
    save_list(store, &list, &items).await
}

pub async fn list_events<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
) -> Result<Vec<EventSummary>> {
    let list: ListDoc<Event> = load_list(store, tenant, twiglet, EVENTS_DOC).await?;
    Ok(list
        .items
        .into_iter()
        .map(|event| EventSummary {
            id: event.id,
            name: event.name,
            description: event.description,
        })
        .collect())
}

pub async fn get_event<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    event_id: &str,
) -> Result<Event> {
    let list: ListDoc<Event> = load_list(store, tenant, twiglet, EVENTS_DOC).await?;
    list.items
        .into_iter()
        .find(|event| event.id == event_id)
        .ok_or_else(|| {
            LibError::not_found("Event not found", anyhow!("no event with id '{}'", event_id))
        })
}

/// Records the twiglet's current nodes and links under a new event.
pub async fn create_event<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    payload: CreateEventPayload,
) -> Result<Event> {
    let name = required_name(&payload.name, "Event name is required")?;
    let list: ListDoc<Event> = load_list(store, tenant, twiglet, EVENTS_DOC).await?;
    if list.items.iter().any(|event| event.name == name) {
        return Err(name_taken("An event with that name already exists", &name));
    }

    let current = db::assemble(store, tenant, twiglet).await?;
    let event = Event {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        description: payload.description.unwrap_or_default(),
        nodes: current.nodes,
        links: current.links,
    };

    let mut items = list.items.clone();
    items.push(event.clone());
    save_list(store, &list, &items).await?;
    Ok(event)
}

/// Removes the event and drops it from every sequence that plays it.
pub async fn delete_event<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    event_id: &str,
) -> Result<()> {
    let events: ListDoc<Event> = load_list(store, tenant, twiglet, EVENTS_DOC).await?;
    let remaining: Vec<Event> = events
        .items
        .iter()
        .filter(|event| event.id != event_id)
        .cloned()
        .collect();
    if remaining.len() == events.items.len() {
        return Err(LibError::not_found(
            "Event not found",
            anyhow!("no event with id '{}'", event_id),
        ));
    }

    let sequences: ListDoc<Sequence> = load_list(store, tenant, twiglet, SEQUENCES_DOC).await?;
    let pruned: Vec<Sequence> = sequences
        .items
        .iter()
        .cloned()
        .map(|mut sequence| {
            sequence.events.retain(|id| id != event_id);
            sequence
        })
        .collect();

    let mut saga = WriteSaga::new("delete_event").replace(
        "events",
        &events.db,
        &events.doc,
        record_body(&remaining)?,
    );
    if pruned != sequences.items {
        saga = saga.replace(
            "sequences",
            &sequences.db,
            &sequences.doc,
            record_body(&pruned)?,
        );
    }

    saga.commit(store).await.map_err(|failure| {
        let source = anyhow!("deleting event {} failed: {}", event_id, failure.summary());
        if failure.inconsistency.is_some() {
            LibError::inconsistent("Event storage is inconsistent; an operator has been notified", source)
        } else if failure.is_clean_conflict() {
            LibError::conflict("The twiglet was modified concurrently, please retry", source)
        } else {
            LibError::database("Failed to delete event", source)
        }
    })?;
    Ok(())
}

pub async fn list_sequences<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
) -> Result<Vec<Sequence>> {
    let list: ListDoc<Sequence> = load_list(store, tenant, twiglet, SEQUENCES_DOC).await?;
    Ok(list.items)
}

pub async fn get_sequence<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    sequence_id: &str,
) -> Result<Sequence> {
    list_sequences(store, tenant, twiglet)
        .await?
        .into_iter()
        .find(|sequence| sequence.id == sequence_id)
        .ok_or_else(|| {
            LibError::not_found(
                "Sequence not found",
                anyhow!("no sequence with id '{}'", sequence_id),
            )
        })
}

async fn validated_sequence<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    id: String,
    payload: SequencePayload,
) -> Result<Sequence> {
    let name = required_name(&payload.name, "Sequence name is required")?;
    let events: ListDoc<Event> = load_list(store, tenant, twiglet, EVENTS_DOC).await?;
    invariants::ensure_sequence_events(&payload.events, &events.items)?;
    Ok(Sequence {
        id,
        name,
        description: payload.description.unwrap_or_default(),
        events: payload.events,
    })
}

pub async fn create_sequence<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    payload: SequencePayload,
) -> Result<Sequence> {
    let id = uuid::Uuid::new_v4().to_string();
    let sequence = validated_sequence(store, tenant, twiglet, id, payload).await?;
    let list: ListDoc<Sequence> = load_list(store, tenant, twiglet, SEQUENCES_DOC).await?;
    if list.items.iter().any(|existing| existing.name == sequence.name) {
        return Err(name_taken(
            "A sequence with that name already exists",
            &sequence.name,
        ));
    }

    let mut items = list.items.clone();
    items.push(sequence.clone());
    save_list(store, &list, &items).await?;
    Ok(sequence)
}

pub async fn update_sequence<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    sequence_id: &str,
    payload: SequencePayload,
) -> Result<Sequence> {
    let sequence =
        validated_sequence(store, tenant, twiglet, sequence_id.to_string(), payload).await?;
    let list: ListDoc<Sequence> = load_list(store, tenant, twiglet, SEQUENCES_DOC).await?;
    let Some(position) = list.items.iter().position(|existing| existing.id == sequence_id) else {
        return Err(LibError::not_found(
            "Sequence not found",
            anyhow!("no sequence with id '{}'", sequence_id),
        ));
    };
    if list
        .items
        .iter()
        .any(|existing| existing.id != sequence_id && existing.name == sequence.name)
    {
        return Err(name_taken(
            "A sequence with that name already exists",
            &sequence.name,
        ));
    }

    let mut items = list.items.clone();
    items[position] = sequence.clone();
    save_list(store, &list, &items).await?;
    Ok(sequence)
}

pub async fn delete_sequence<S: DocumentStore>(
    store: &S,
    tenant: &TenantContext,
    twiglet: &str,
    sequence_id: &str,
) -> Result<()> {
    let list: ListDoc<Sequence> = load_list(store, tenant, twiglet, SEQUENCES_DOC).await?;
    let items: Vec<Sequence> = list
        .items
        .iter()
        .filter(|sequence| sequence.id != sequence_id)
        .cloned()
        .collect();
    if items.len() == list.items.len() {
        return Err(LibError::not_found(
            "Sequence not found",
            anyhow!("no sequence with id '{}'", sequence_id),
        ));
    }
    save_list(store, &list, &items).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Map;

    use super::{
        create_event, create_sequence, create_view, delete_event, get_sequence,
        get_twiglet_model, list_views, update_twiglet_model, update_view,
    };
    use crate::db::create_twiglet;
    use crate::error::{ConflictState, ErrorKind};
    use crate::models::{
        CreateEventPayload, CreateTwigletPayload, SequencePayload, UpdateTwigletModelPayload,
        ViewPayload,
    };
    use crate::store::MemoryStore;
    use crate::tenant::TenantContext;

    async fn seeded() -> (MemoryStore, TenantContext) {
        let store = MemoryStore::new();
        let tenant = TenantContext::shared();
        create_twiglet(
            &store,
            &tenant,
            "alice",
            CreateTwigletPayload {
                name: "T".to_string(),
                description: None,
                model: None,
                clone_twiglet: None,
                commit_message: "initial".to_string(),
            },
        )
        .await
        .expect("create twiglet");
        (store, tenant)
    }

    fn view(name: &str) -> ViewPayload {
        ViewPayload {
            name: name.to_string(),
            description: None,
            nodes: Map::new(),
            links: Map::new(),
            user_state: serde_json::json!({ "autoConnectivity": "in" }),
        }
    }

    #[tokio::test]
    async fn view_names_are_unique() {
        let (store, tenant) = seeded().await;
        create_view(&store, &tenant, "T", view("v1"))
            .await
            .expect("create v1");
        create_view(&store, &tenant, "T", view("v2"))
            .await
            .expect("create v2");

        let err = update_view(&store, &tenant, "T", "v2", view("v1"))
            .await
            .expect_err("rename onto v1");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let names: Vec<_> = list_views(&store, &tenant, "T")
            .await
            .expect("list")
            .into_iter()
            .map(|view| view.name)
            .collect();
        assert_eq!(names, vec!["v1".to_string(), "v2".to_string()]);
    }

    #[tokio::test]
    async fn deleting_event_prunes_sequences() {
        let (store, tenant) = seeded().await;
        let first = create_event(
            &store,
            &tenant,
            "T",
            CreateEventPayload {
                name: "first".to_string(),
                description: None,
            },
        )
        .await
        .expect("event");
        let second = create_event(
            &store,
            &tenant,
            "T",
            CreateEventPayload {
                name: "second".to_string(),
                description: None,
            },
        )
        .await
        .expect("event");

        let sequence = create_sequence(
            &store,
            &tenant,
            "T",
            SequencePayload {
                name: "story".to_string(),
                description: None,
                events: vec![first.id.clone(), second.id.clone()],
            },
        )
        .await
        .expect("sequence");

        delete_event(&store, &tenant, "T", &first.id)
            .await
            .expect("delete event");
        let after = get_sequence(&store, &tenant, "T", &sequence.id)
            .await
            .expect("sequence");
        assert_eq!(after.events, vec![second.id]);
    }

    #[tokio::test]
    async fn sequence_rejects_unknown_events() {
        let (store, tenant) = seeded().await;
        let err = create_sequence(
            &store,
            &tenant,
            "T",
            SequencePayload {
                name: "story".to_string(),
                description: None,
                events: vec!["missing".to_string()],
            },
        )
        .await
        .expect_err("unknown event");
        assert_eq!(err.code, "sequence_unknown_event");
    }

    #[tokio::test]
    async fn twiglet_model_update_checks_revision() {
        let (store, tenant) = seeded().await;
        let model = get_twiglet_model(&store, &tenant, "T").await.expect("model");
        let updated = update_twiglet_model(
            &store,
            &tenant,
            "T",
            UpdateTwigletModelPayload {
                revision: model.revision.clone(),
                entities: BTreeMap::new(),
            },
        )
        .await
        .expect("update");

        let err = update_twiglet_model(
            &store,
            &tenant,
            "T",
            UpdateTwigletModelPayload {
                revision: model.revision,
                entities: BTreeMap::new(),
            },
        )
        .await
        .expect_err("stale");
        assert_eq!(
            err.conflict,
            Some(ConflictState::TwigletModel(Box::new(updated)))
        );
    }
}
