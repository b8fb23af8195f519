//! Document store seam.
//!
//! Every twiglet is spread over several documents. The store only offers
//! per-document optimistic writes: a put must name the revision it replaces
//! and every successful write yields a fresh revision.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod flaky;
pub mod memory;
#[cfg(feature = "sqlx")]
pub mod postgres;

pub use memory::{MemoryStore, OpCounts};
#[cfg(feature = "sqlx")]
pub use postgres::PgDocumentStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database {db} not found")]
    DatabaseNotFound { db: String },
    #[error("document {db}/{id} not found")]
    NotFound { db: String, id: String },
    #[error("document {db}/{id} revision conflict")]
    Conflict { db: String, id: String },
    #[error("document store backend failure: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn not_found(db: &str, id: &str) -> Self {
        Self::NotFound {
            db: db.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(db: &str, id: &str) -> Self {
        Self::Conflict {
            db: db.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn missing_database(db: &str) -> Self {
        Self::DatabaseNotFound { db: db.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::DatabaseNotFound { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub rev: String,
    pub body: Value,
}

impl Document {
    /// Decodes the `data` field every record document wraps its payload in.
    pub fn data<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let data = self.body.get("data").cloned().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|err| {
            StoreError::Backend(anyhow::anyhow!(
                "document {} has malformed data: {}",
                self.id,
                err
            ))
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|err| {
            StoreError::Backend(anyhow::anyhow!(
                "document {} has malformed body: {}",
                self.id,
                err
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    pub id: String,
    /// `None` creates the document; `Some` replaces that exact revision.
    pub rev: Option<String>,
    pub body: Value,
}

impl DocumentWrite {
    pub fn create(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body,
        }
    }

    pub fn replace(current: &Document, body: Value) -> Self {
        Self {
            id: current.id.clone(),
            rev: Some(current.rev.clone()),
            body,
        }
    }
}

/// Wraps `data` the way record documents are stored: `{"data": ...}`.
pub fn record_body<T: Serialize>(data: &T) -> StoreResult<Value> {
    let data = serde_json::to_value(data).map_err(|err| StoreError::Backend(err.into()))?;
    Ok(serde_json::json!({ "data": data }))
}

pub trait DocumentStore: Send + Sync {
    fn get(&self, db: &str, id: &str) -> impl Future<Output = StoreResult<Document>> + Send;

    /// Returns documents in id order. With `keys`, only those ids are
    /// returned, in key order; a missing key is `NotFound`.
    fn all_docs(
        &self,
        db: &str,
        keys: Option<&[&str]>,
    ) -> impl Future<Output = StoreResult<Vec<Document>>> + Send;

    fn put(&self, db: &str, doc: DocumentWrite) -> impl Future<Output = StoreResult<String>> + Send;

    fn remove(&self, db: &str, id: &str, rev: &str)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Creating a database that already exists is a no-op.
    fn create_db(&self, db: &str) -> impl Future<Output = StoreResult<()>> + Send;

    fn destroy_db(&self, db: &str) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Next revision string after `previous`, in `<generation>-<token>` form.
pub(crate) fn next_revision(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(generation, _)| generation.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, uuid::Uuid::new_v4().simple())
}
