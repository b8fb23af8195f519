use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::auth::{AuthenticatedUser, ResolvesTenant, Tenant, ValidatesSession};
use crate::error::{ErrorKind, LibError};
use crate::models::{
    CreateEventPayload, CreateModelPayload, CreateTwigletPayload, PatchTwigletPayload,
    SequencePayload, UpdateModelPayload, UpdateTwigletModelPayload, UpdateTwigletPayload,
    ViewPayload,
};
use crate::store::DocumentStore;
use crate::{db, org_models, records};

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Inconsistent => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "twiglet api request failed");
        } else {
            tracing::warn!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "twiglet api request rejected");
        }

        let mut error = json!({
            "code": self.0.code,
            "message": self.0.public,
        });
        if let Some(current) = self.0.conflict {
            error["data"] = json!(current);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub trait HasStore {
    type Store: DocumentStore + 'static;

    fn store(&self) -> Arc<Self::Store>;
}

pub trait TwigletApp: HasStore + ValidatesSession + ResolvesTenant {}

impl<T> TwigletApp for T where T: HasStore + ValidatesSession + ResolvesTenant {}

async fn list_twiglets_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let twiglets = db::list_twiglets(app.store().as_ref(), &tenant).await?;
    Ok(Json(twiglets))
}

async fn create_twiglet_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    auth_user: AuthenticatedUser,
    Json(payload): Json<CreateTwigletPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let twiglet = db::create_twiglet(
        app.store().as_ref(),
        &tenant,
        auth_user.display_name(),
        payload,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(twiglet)))
}

async fn get_twiglet_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let twiglet = db::assemble(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(twiglet))
}

async fn update_twiglet_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<UpdateTwigletPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let twiglet = db::update_twiglet(
        app.store().as_ref(),
        &tenant,
        &name,
        auth_user.display_name(),
        payload,
    )
    .await?;
    Ok(Json(twiglet))
}

async fn patch_twiglet_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<PatchTwigletPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let twiglet = db::patch_twiglet(
        app.store().as_ref(),
        &tenant,
        &name,
        auth_user.display_name(),
        payload,
    )
    .await?;
    Ok(Json(twiglet))
}

async fn delete_twiglet_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    db::delete_twiglet(app.store().as_ref(), &tenant, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn changelog_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let changelog = db::get_changelog(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(changelog))
}

async fn get_twiglet_model_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let model = records::get_twiglet_model(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(model))
}

async fn update_twiglet_model_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<UpdateTwigletModelPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let model =
        records::update_twiglet_model(app.store().as_ref(), &tenant, &name, payload).await?;
    Ok(Json(model))
}

async fn list_views_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let views = records::list_views(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(views))
}

async fn create_view_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<ViewPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let view = records::create_view(app.store().as_ref(), &tenant, &name, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_view_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path((name, view_name)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let view = records::get_view(app.store().as_ref(), &tenant, &name, &view_name).await?;
    Ok(Json(view))
}

async fn update_view_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path((name, view_name)): Path<(String, String)>,
    Json(payload): Json<ViewPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let view =
        records::update_view(app.store().as_ref(), &tenant, &name, &view_name, payload).await?;
    Ok(Json(view))
}

async fn delete_view_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path((name, view_name)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    records::delete_view(app.store().as_ref(), &tenant, &name, &view_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_events_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let events = records::list_events(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(events))
}

async fn create_event_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<CreateEventPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let event = records::create_event(app.store().as_ref(), &tenant, &name, payload).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path((name, event_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let event = records::get_event(app.store().as_ref(), &tenant, &name, &event_id).await?;
    Ok(Json(event))
}

async fn delete_event_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path((name, event_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    records::delete_event(app.store().as_ref(), &tenant, &name, &event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sequences_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let sequences = records::list_sequences(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(sequences))
}

async fn create_sequence_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<SequencePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let sequence = records::create_sequence(app.store().as_ref(), &tenant, &name, payload).await?;
    Ok((StatusCode::CREATED, Json(sequence)))
}

async fn get_sequence_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path((name, sequence_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let sequence =
        records::get_sequence(app.store().as_ref(), &tenant, &name, &sequence_id).await?;
    Ok(Json(sequence))
}

async fn update_sequence_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path((name, sequence_id)): Path<(String, String)>,
    Json(payload): Json<SequencePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let sequence = records::update_sequence(
        app.store().as_ref(),
        &tenant,
        &name,
        &sequence_id,
        payload,
    )
    .await?;
    Ok(Json(sequence))
}

async fn delete_sequence_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path((name, sequence_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    records::delete_sequence(app.store().as_ref(), &tenant, &name, &sequence_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_models_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let models = org_models::list_models(app.store().as_ref(), &tenant).await?;
    Ok(Json(models))
}

async fn create_model_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Json(payload): Json<CreateModelPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let model = org_models::create_model(app.store().as_ref(), &tenant, payload).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

async fn get_model_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let model = org_models::get_model(app.store().as_ref(), &tenant, &name).await?;
    Ok(Json(model))
}

async fn update_model_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(payload): Json<UpdateModelPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    let model = org_models::update_model(app.store().as_ref(), &tenant, &name, payload).await?;
    Ok(Json(model))
}

async fn delete_model_handler<S>(
    State(app): State<S>,
    Tenant(tenant): Tenant,
    _auth_user: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    org_models::delete_model(app.store().as_ref(), &tenant, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes<S>() -> Router<S>
where
    S: TwigletApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /twiglets [GET,POST]");
    tracing::info!("Registering route /twiglets/{{name}} [GET,PUT,PATCH,DELETE]");
    tracing::info!("Registering route /twiglets/{{name}}/changelog [GET]");
    tracing::info!("Registering route /twiglets/{{name}}/model [GET,PUT]");
    tracing::info!("Registering route /twiglets/{{name}}/views [GET,POST]");
    tracing::info!("Registering route /twiglets/{{name}}/views/{{view}} [GET,PUT,DELETE]");
    tracing::info!("Registering route /twiglets/{{name}}/events [GET,POST]");
    tracing::info!("Registering route /twiglets/{{name}}/events/{{id}} [GET,DELETE]");
    tracing::info!("Registering route /twiglets/{{name}}/sequences [GET,POST]");
    tracing::info!("Registering route /twiglets/{{name}}/sequences/{{id}} [GET,PUT,DELETE]");
    tracing::info!("Registering route /models [GET,POST]");
    tracing::info!("Registering route /models/{{name}} [GET,PUT,DELETE]");

    Router::new()
        .route(
            "/twiglets",
            get(list_twiglets_handler::<S>).post(create_twiglet_handler::<S>),
        )
        .route(
            "/twiglets/{name}",
            get(get_twiglet_handler::<S>)
                .put(update_twiglet_handler::<S>)
                .patch(patch_twiglet_handler::<S>)
                .delete(delete_twiglet_handler::<S>),
        )
        .route("/twiglets/{name}/changelog", get(changelog_handler::<S>))
        .route(
            "/twiglets/{name}/model",
            get(get_twiglet_model_handler::<S>).put(update_twiglet_model_handler::<S>),
        )
        .route(
            "/twiglets/{name}/views",
            get(list_views_handler::<S>).post(create_view_handler::<S>),
        )
        .route(
            "/twiglets/{name}/views/{view}",
            get(get_view_handler::<S>)
                .put(update_view_handler::<S>)
                .delete(delete_view_handler::<S>),
        )
        .route(
            "/twiglets/{name}/events",
            get(list_events_handler::<S>).post(create_event_handler::<S>),
        )
        .route(
            "/twiglets/{name}/events/{id}",
            get(get_event_handler::<S>).delete(delete_event_handler::<S>),
        )
        .route(
            "/twiglets/{name}/sequences",
            get(list_sequences_handler::<S>).post(create_sequence_handler::<S>),
        )
        .route(
            "/twiglets/{name}/sequences/{id}",
            get(get_sequence_handler::<S>)
                .put(update_sequence_handler::<S>)
                .delete(delete_sequence_handler::<S>),
        )
        .route(
            "/models",
            get(list_models_handler::<S>).post(create_model_handler::<S>),
        )
        .route(
            "/models/{name}",
            get(get_model_handler::<S>)
                .put(update_model_handler::<S>)
                .delete(delete_model_handler::<S>),
        )
}
