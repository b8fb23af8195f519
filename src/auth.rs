use std::convert::Infallible;
use std::future::Future;

use anyhow::anyhow;
use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, HOST};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::api::AppError;
use crate::config::DEFAULT_SESSION_COOKIE;
use crate::error::LibError;
use crate::tenant::{TenantContext, TenantResolver};

/// The caller behind a write, as established by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name recorded against changelog entries.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Turns a session cookie into a user. Implemented by the hosting app.
pub trait ValidatesSession {
    fn session_cookie(&self) -> &str {
        DEFAULT_SESSION_COOKIE
    }

    fn validate_session(
        &self,
        token: &str,
    ) -> impl Future<Output = Option<AuthenticatedUser>> + Send;
}

pub trait ResolvesTenant {
    fn tenant_resolver(&self) -> &TenantResolver;
}

fn cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: ValidatesSession + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let Some(token) = cookie_value(parts, state.session_cookie()).map(str::to_string) else {
            return Err(AppError(LibError::unauthorized(
                "Authentication required",
                anyhow!("request carried no session"),
            )));
        };

        match state.validate_session(&token).await {
            Some(user) => {
                parts.extensions.insert(user.clone());
                Ok(user)
            }
            None => Err(AppError(LibError::unauthorized(
                "Authentication required",
                anyhow!("session cookie did not validate"),
            ))),
        }
    }
}

/// Tenant the request is scoped to, resolved from its Host header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant(pub TenantContext);

impl<S> FromRequestParts<S> for Tenant
where
    S: ResolvesTenant + Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| parts.uri.host());
        Ok(Tenant(state.tenant_resolver().resolve(host)))
    }
}
