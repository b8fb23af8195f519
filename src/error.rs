use anyhow::anyhow;
use serde::Serialize;

use crate::models::{OrgModel, Twiglet, TwigletModel};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    Forbidden,
    Unauthorized,
    InvalidInput,
    NotFound,
    Conflict,
    Inconsistent,
    Unknown,
}

/// Current server-side state handed back with a revision conflict so the
/// caller can reconcile without another round-trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConflictState {
    Twiglet(Box<Twiglet>),
    TwigletModel(Box<TwigletModel>),
    Model(Box<OrgModel>),
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub conflict: Option<ConflictState>,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            conflict: None,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            conflict: None,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code,
            public,
            conflict: None,
            source,
        }
    }

    pub fn malformed_revision(source: anyhow::Error) -> Self {
        Self::invalid_with_code(
            "malformed_revision",
            "Revision must have the form info:nodes:links",
            source,
        )
    }

    pub fn unauthorized(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            code: "unauthorized",
            public,
            conflict: None,
            source,
        }
    }

    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            code: "forbidden",
            public,
            conflict: None,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            conflict: None,
            source,
        }
    }

    /// Name collisions and other conflicts with no state to hand back.
    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code: "conflict",
            public,
            conflict: None,
            source,
        }
    }

    pub fn revision_conflict(current: ConflictState, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code: "revision_conflict",
            public: "Your revision is out of date",
            conflict: Some(current),
            source,
        }
    }

    pub fn inconsistent(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Inconsistent,
            code: "inconsistent_state",
            public,
            conflict: None,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            conflict: None,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    /// Maps a store failure, reporting store-level 404s with `not_found_public`.
    pub fn from_store(
        public: &'static str,
        not_found_public: &'static str,
        err: StoreError,
    ) -> Self {
        match err {
            StoreError::NotFound { .. } | StoreError::DatabaseNotFound { .. } => {
                Self::not_found(not_found_public, anyhow!(err))
            }
            StoreError::Conflict { .. } => Self::conflict(public, anyhow!(err)),
            StoreError::Backend(_) => Self::database(public, anyhow!(err)),
        }
    }
}

impl From<StoreError> for LibError {
    fn from(value: StoreError) -> Self {
        Self::from_store("Document store request failed", "Document not found", value)
    }
}
