use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use twiglet_api::prelude::*;

#[derive(Clone)]
struct DevAuthConfig {
    default_user: Option<String>,
}

struct DemoApp<D> {
    store: Arc<D>,
    config: Arc<TwigletConfig>,
}

impl<D> Clone for DemoApp<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<D: DocumentStore + 'static> HasStore for DemoApp<D> {
    type Store = D;

    fn store(&self) -> Arc<D> {
        Arc::clone(&self.store)
    }
}

impl<D: Send + Sync> ValidatesSession for DemoApp<D> {
    fn session_cookie(&self) -> &str {
        &self.config.session_cookie
    }

    async fn validate_session(&self, _token: &str) -> Option<AuthenticatedUser> {
        None
    }
}

impl<D> ResolvesTenant for DemoApp<D> {
    fn tenant_resolver(&self) -> &TenantResolver {
        &self.config.tenants
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(TwigletConfig::from_env().context("invalid twiglet api configuration")?);
    let auth = DevAuthConfig {
        default_user: std::env::var("TWIG_API_DEV_DEFAULT_USER")
            .ok()
            .filter(|value| !value.trim().is_empty()),
    };

    #[cfg(feature = "sqlx")]
    if let Some(database_url) = config.database_url.clone() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("failed to connect to postgres")?;
        create_document_tables(&pool)
            .await
            .context("failed to run document migrations")?;
        let store = Arc::new(PgDocumentStore::new(Arc::new(pool)));
        return serve(store, config, auth).await;
    }

    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the sqlx feature is off; using the in-memory store");
    }
    serve(Arc::new(MemoryStore::new()), config, auth).await
}

async fn serve<D>(
    store: Arc<D>,
    config: Arc<TwigletConfig>,
    auth: DevAuthConfig,
) -> anyhow::Result<()>
where
    D: DocumentStore + 'static,
{
    let bind_addr = config.bind_addr;
    let app_state = DemoApp { store, config };

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/whoami", get(whoami_handler))
        .merge(twiglet_api::api::routes::<DemoApp<D>>())
        .layer(from_fn_with_state(auth, dev_identity_middleware))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    tracing::info!(%bind_addr, "twiglet api listening");
    tracing::info!("auth shim headers: x-dev-user, x-dev-name, x-dev-email");

    axum::serve(listener, app)
        .await
        .context("twiglet api server failed")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn whoami_handler(auth_user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(auth_user)
}

async fn dev_identity_middleware(
    State(auth): State<DevAuthConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let headers = req.headers();
    let user = match header_value(headers, "x-dev-user") {
        Some(id) if id.trim().is_empty() => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_dev_user",
                "x-dev-user must not be blank",
            );
        }
        Some(id) => Some(id.trim().to_string()),
        None => auth.default_user.clone(),
    };

    if let Some(id) = user {
        let auth_user = AuthenticatedUser {
            id,
            name: header_value(headers, "x-dev-name").map(str::to_string),
            email: header_value(headers, "x-dev-email").map(str::to_string),
        };
        req.extensions_mut().insert(auth_user);
    }
    next.run(req).await
}

fn header_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}

fn json_error(status: StatusCode, code: &'static str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        })),
    )
        .into_response()
}
