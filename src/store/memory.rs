use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use super::{Document, DocumentStore, DocumentWrite, StoreError, StoreResult, next_revision};

#[derive(Debug, Clone)]
struct StoredDoc {
    rev: String,
    body: Value,
}

/// Snapshot of how many reads and writes reached the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub reads: u64,
    pub writes: u64,
}

/// In-process document store backed by `tokio::sync::RwLock` maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<String, BTreeMap<String, StoredDoc>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op_counts(&self) -> OpCounts {
        OpCounts {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    pub async fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, db: &str, id: &str) -> StoreResult<Document> {
        self.record_read();
        let databases = self.databases.read().await;
        let docs = databases.get(db).ok_or_else(|| StoreError::missing_database(db))?;
        let stored = docs.get(id).ok_or_else(|| StoreError::not_found(db, id))?;
        Ok(Document {
            id: id.to_string(),
            rev: stored.rev.clone(),
            body: stored.body.clone(),
        })
    }

    async fn all_docs(&self, db: &str, keys: Option<&[&str]>) -> StoreResult<Vec<Document>> {
        self.record_read();
        let databases = self.databases.read().await;
        let docs = databases.get(db).ok_or_else(|| StoreError::missing_database(db))?;
        let to_document = |id: &str, stored: &StoredDoc| Document {
            id: id.to_string(),
            rev: stored.rev.clone(),
            body: stored.body.clone(),
        };

        match keys {
            Some(keys) => keys
                .iter()
                .map(|key| {
                    docs.get(*key)
                        .map(|stored| to_document(*key, stored))
                        .ok_or_else(|| StoreError::not_found(db, key))
                })
                .collect(),
            None => Ok(docs
                .iter()
                .map(|(id, stored)| to_document(id, stored))
                .collect()),
        }
    }

    async fn put(&self, db: &str, doc: DocumentWrite) -> StoreResult<String> {
        self.record_write();
        let mut databases = self.databases.write().await;
        let docs = databases.get_mut(db).ok_or_else(|| StoreError::missing_database(db))?;

        let current_rev = docs.get(&doc.id).map(|stored| stored.rev.as_str());
        if current_rev != doc.rev.as_deref() {
            return Err(StoreError::conflict(db, &doc.id));
        }

        let rev = next_revision(current_rev);
        docs.insert(
            doc.id,
            StoredDoc {
                rev: rev.clone(),
                body: doc.body,
            },
        );
        Ok(rev)
    }

    async fn remove(&self, db: &str, id: &str, rev: &str) -> StoreResult<()> {
        self.record_write();
        let mut databases = self.databases.write().await;
        let docs = databases.get_mut(db).ok_or_else(|| StoreError::missing_database(db))?;
        let matches = match docs.get(id) {
            None => return Err(StoreError::not_found(db, id)),
            Some(stored) => stored.rev == rev,
        };
        if !matches {
            return Err(StoreError::conflict(db, id));
        }
        docs.remove(id);
        Ok(())
    }

    async fn create_db(&self, db: &str) -> StoreResult<()> {
        self.record_write();
        self.databases
            .write()
            .await
            .entry(db.to_string())
            .or_default();
        Ok(())
    }

    async fn destroy_db(&self, db: &str) -> StoreResult<()> {
        self.record_write();
        self.databases
            .write()
            .await
            .remove(db)
            .map(|_| ())
            .ok_or_else(|| StoreError::missing_database(db))
    }
}
