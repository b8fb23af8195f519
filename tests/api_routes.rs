use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use twiglet_api::api::routes;
use twiglet_api::prelude::*;

const SESSION: &str = "sid=valid-session";

#[derive(Clone)]
struct TestApp {
    store: Arc<MemoryStore>,
    tenants: TenantResolver,
}

impl HasStore for TestApp {
    type Store = MemoryStore;

    fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }
}

impl ValidatesSession for TestApp {
    async fn validate_session(&self, token: &str) -> Option<AuthenticatedUser> {
        (token == "valid-session").then(|| AuthenticatedUser {
            id: "u-1".to_string(),
            name: Some("alice".to_string()),
            email: None,
        })
    }
}

impl ResolvesTenant for TestApp {
    fn tenant_resolver(&self) -> &TenantResolver {
        &self.tenants
    }
}

fn app_with(tenants: TenantResolver) -> Router {
    routes::<TestApp>().with_state(TestApp {
        store: Arc::new(MemoryStore::new()),
        tenants,
    })
}

fn app() -> Router {
    app_with(TenantResolver::default())
}

fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

async fn create(app: &Router, name: &str) -> Value {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/twiglets",
            Some(SESSION),
            Some(json!({ "name": name, "commitMessage": "initial" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

fn update_body(revision: &str, message: &str) -> Value {
    json!({
        "name": "T",
        "revision": revision,
        "nodes": [{ "id": "a", "name": "a", "type": "ent1" }],
        "links": [],
        "commitMessage": message
    })
}

#[tokio::test]
async fn writes_require_a_session() {
    let app = app();
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/twiglets",
            None,
            Some(json!({ "name": "T", "commitMessage": "initial" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/twiglets",
            Some("sid=forged"),
            Some(json!({ "name": "T", "commitMessage": "initial" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_then_read_is_public() {
    let app = app();
    let created = create(&app, "T").await;
    assert_eq!(created["latestCommit"]["user"], "alice");

    let (status, body) = send(&app, request("GET", "/twiglets/T", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], created["revision"]);

    let (status, body) = send(&app, request("GET", "/twiglets", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn malformed_revision_is_bad_request() {
    let app = app();
    create(&app, "T").await;
    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/twiglets/T",
            Some(SESSION),
            Some(update_body("only-one-part", "change")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "malformed_revision");
    assert!(body["error"].get("data").is_none());
}

#[tokio::test]
async fn unknown_twiglet_is_not_found() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/twiglets/ghost", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn stale_revision_conflict_carries_current_twiglet() {
    let app = app();
    let created = create(&app, "T").await;
    let token = created["revision"].as_str().expect("revision string").to_string();

    let (status, updated) = send(
        &app,
        request(
            "PUT",
            "/twiglets/T",
            Some(SESSION),
            Some(update_body(&token, "first")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/twiglets/T",
            Some(SESSION),
            Some(update_body(&token, "second")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "revision_conflict");
    assert_eq!(body["error"]["data"]["revision"], updated["revision"]);
    assert_eq!(body["error"]["data"]["nodes"], updated["nodes"]);
}

#[tokio::test]
async fn model_conflict_carries_current_model() {
    let app = app();
    let (status, created) = send(
        &app,
        request(
            "POST",
            "/models",
            Some(SESSION),
            Some(json!({ "name": "org", "entities": {} })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let stale = created["revision"].clone();

    let body = json!({ "revision": stale, "entities": {} });
    let (status, updated) = send(
        &app,
        request("PUT", "/models/org", Some(SESSION), Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, conflict) =
        send(&app, request("PUT", "/models/org", Some(SESSION), Some(body))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["error"]["data"]["revision"], updated["revision"]);
}

#[tokio::test]
async fn tenants_resolve_from_host() {
    let app = app_with(TenantResolver {
        from_host: true,
        base_host: Some("twig.example".to_string()),
    });

    let req = Request::builder()
        .method("POST")
        .uri("/twiglets")
        .header("host", "acme.twig.example")
        .header("cookie", SESSION)
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "name": "T", "commitMessage": "initial" }).to_string(),
        ))
        .expect("request");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);

    let lookup = |host: &'static str| {
        Request::builder()
            .uri("/twiglets/T")
            .header("host", host)
            .body(Body::empty())
            .expect("request")
    };
    let (status, _) = send(&app, lookup("acme.twig.example")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, lookup("globex.twig.example")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_and_sequences_round_through_routes() {
    let app = app();
    create(&app, "T").await;

    let (status, event) = send(
        &app,
        request(
            "POST",
            "/twiglets/T/events",
            Some(SESSION),
            Some(json!({ "name": "launch" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let event_id = event["id"].as_str().expect("event id").to_string();

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/twiglets/T/sequences",
            Some(SESSION),
            Some(json!({ "name": "story", "events": ["missing"] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "sequence_unknown_event");

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/twiglets/T/sequences",
            Some(SESSION),
            Some(json!({ "name": "story", "events": [event_id] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        request(
            "DELETE",
            &format!("/twiglets/T/events/{event_id}"),
            Some(SESSION),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, sequences) =
        send(&app, request("GET", "/twiglets/T/sequences", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sequences[0]["events"], json!([]));
}
