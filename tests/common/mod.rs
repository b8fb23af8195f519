#![allow(dead_code)]

use serde_json::json;
use twiglet_api::models::{CreateTwigletPayload, Link, Node, Twiglet, UpdateTwigletPayload};
use twiglet_api::prelude::*;

pub fn node(id: &str) -> Node {
    serde_json::from_value(json!({ "id": id, "name": id, "type": "ent1" }))
        .expect("node should deserialize")
}

pub fn link(id: &str, source: &str, target: &str) -> Link {
    serde_json::from_value(json!({ "id": id, "source": source, "target": target }))
        .expect("link should deserialize")
}

pub fn create_payload(name: &str) -> CreateTwigletPayload {
    CreateTwigletPayload {
        name: name.to_string(),
        description: Some("test twiglet".to_string()),
        model: None,
        clone_twiglet: None,
        commit_message: "initial".to_string(),
    }
}

/// Full replacement of `current` carrying `revision` and `message`.
pub fn update_payload(current: &Twiglet, revision: &str, message: &str) -> UpdateTwigletPayload {
    UpdateTwigletPayload {
        name: current.name.clone(),
        description: Some(current.description.clone()),
        revision: revision.to_string(),
        nodes: vec![node("a"), node("b")],
        links: vec![link("l1", "a", "b")],
        commit_message: message.to_string(),
        do_replacement: false,
    }
}

pub async fn seeded(name: &str) -> (MemoryStore, TenantContext, Twiglet) {
    let store = MemoryStore::new();
    let tenant = TenantContext::shared();
    let twiglet = create_twiglet(&store, &tenant, "alice", create_payload(name))
        .await
        .expect("seed twiglet");
    (store, tenant, twiglet)
}
