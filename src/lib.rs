#[cfg(feature = "api")]
pub mod api;
#[cfg(feature = "api")]
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod invariants;
pub mod models;
pub mod operations;
pub mod org_models;
pub mod records;
pub mod revision;
pub mod saga;
pub mod store;
pub mod tenant;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, HasStore, TwigletApp};
    #[cfg(feature = "api")]
    pub use crate::auth::{AuthenticatedUser, ResolvesTenant, Tenant, ValidatesSession};
    pub use crate::config::TwigletConfig;
    pub use crate::db::{
        assemble, create_twiglet, delete_twiglet, get_changelog, list_twiglets, patch_twiglet,
        update_twiglet,
    };
    pub use crate::error::{ConflictState, ErrorKind, LibError, Result};
    pub use crate::models::{
        Changelog, CommitEntry, CreateTwigletPayload, Link, Node, OrgModel, PatchTwigletPayload,
        Twiglet, TwigletId, TwigletModel, TwigletSummary, UpdateTwigletPayload,
    };
    pub use crate::operations::{TwigletOperation, TwigletOperationResult, TwigletOperations};
    pub use crate::revision::CompositeRevision;
    pub use crate::saga::{InconsistencyRecord, SagaFailure, WriteSaga};
    #[cfg(feature = "sqlx")]
    pub use crate::store::{PgDocumentStore, postgres::create_document_tables};
    pub use crate::store::{DocumentStore, MemoryStore, StoreError};
    pub use crate::tenant::{TenantContext, TenantResolver};
}
