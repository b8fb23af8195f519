use std::env;
use std::net::SocketAddr;

use anyhow::{Context, anyhow};

use crate::tenant::TenantResolver;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_SESSION_COOKIE: &str = "sid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwigletConfig {
    pub bind_addr: SocketAddr,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub session_cookie: String,
    pub tenants: TenantResolver,
}

impl TwigletConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = non_empty(lookup("TWIG_API_BIND")).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid TWIG_API_BIND '{}'", bind))?;

        let session_cookie = non_empty(lookup("TWIG_API_SESSION_COOKIE"))
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
        if session_cookie.contains([';', '=', ' ']) {
            return Err(anyhow!(
                "invalid TWIG_API_SESSION_COOKIE '{}'",
                session_cookie
            ));
        }

        Ok(Self {
            bind_addr,
            database_url: non_empty(lookup("DATABASE_URL")),
            session_cookie,
            tenants: TenantResolver {
                from_host: flag(lookup("TWIG_API_TENANT_FROM_HOST")),
                base_host: non_empty(lookup("TWIG_API_BASE_HOST")),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag(value: Option<String>) -> bool {
    match value {
        Some(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        None => false,
    }
}
