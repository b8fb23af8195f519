//! Tenant scoping for database names.
//!
//! A tenant is resolved once per request from the `Host` header and then
//! handed explicitly to every data-access call.

use std::net::IpAddr;

pub const TWIGLETS_DB: &str = "twiglets";
pub const ORG_MODELS_DB: &str = "organisation_models";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TenantContext {
    prefix: Option<String>,
}

impl TenantContext {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// Context for deployments without tenant separation.
    pub fn shared() -> Self {
        Self { prefix: None }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn db_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name.to_string(),
        }
    }

    pub fn twiglets_db(&self) -> String {
        self.db_name(TWIGLETS_DB)
    }

    pub fn org_models_db(&self) -> String {
        self.db_name(ORG_MODELS_DB)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantResolver {
    pub from_host: bool,
    /// When set, only hosts of the form `<tenant>.<base_host>` carry a tenant.
    pub base_host: Option<String>,
}

impl TenantResolver {
    pub fn resolve(&self, host: Option<&str>) -> TenantContext {
        if !self.from_host {
            return TenantContext::shared();
        }
        host.and_then(|host| self.tenant_label(host))
            .map(TenantContext::new)
            .unwrap_or_default()
    }

    fn tenant_label(&self, host: &str) -> Option<String> {
        let host = strip_port(host.trim()).to_ascii_lowercase();
        if host.is_empty() || host == "localhost" || host.parse::<IpAddr>().is_ok() {
            return None;
        }

        let label = match &self.base_host {
            Some(base) => {
                let base = base.trim_matches('.').to_ascii_lowercase();
                let rest = host.strip_suffix(&base)?.strip_suffix('.')?;
                if rest.contains('.') {
                    return None;
                }
                rest.to_string()
            }
            None => {
                let labels: Vec<&str> = host.split('.').collect();
                if labels.len() < 3 {
                    return None;
                }
                labels[0].to_string()
            }
        };

        let valid = !label.is_empty()
            && label
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        valid.then_some(label)
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // bracketed IPv6 literal
        return host
            .split_once(']')
            .map(|(addr, _)| addr.trim_start_matches('['))
            .unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|ch| ch.is_ascii_digit()) => name,
        _ => host,
    }
}
