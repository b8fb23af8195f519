use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{Document, DocumentStore, DocumentWrite, MemoryStore, StoreError, StoreResult};

/// Delegates to a memory store but fails puts and removes on chosen ids.
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    /// Puts still allowed per id before every further put fails.
    failing_puts: Mutex<HashMap<String, usize>>,
    failing_removes: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_puts: Mutex::new(HashMap::new()),
            failing_removes: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn fail_put(&self, id: &str) {
        self.fail_put_after(id, 0);
    }

    pub(crate) fn fail_put_after(&self, id: &str, allowed: usize) {
        self.failing_puts
            .lock()
            .expect("lock")
            .insert(id.to_string(), allowed);
    }

    pub(crate) fn fail_remove(&self, id: &str) {
        self.failing_removes
            .lock()
            .expect("lock")
            .insert(id.to_string());
    }

    fn put_fails(&self, id: &str) -> bool {
        let mut failing = self.failing_puts.lock().expect("lock");
        match failing.get_mut(id) {
            Some(0) => true,
            Some(allowed) => {
                *allowed -= 1;
                false
            }
            None => false,
        }
    }
}

impl DocumentStore for FlakyStore {
    async fn get(&self, db: &str, id: &str) -> StoreResult<Document> {
        self.inner.get(db, id).await
    }

    async fn all_docs(&self, db: &str, keys: Option<&[&str]>) -> StoreResult<Vec<Document>> {
        self.inner.all_docs(db, keys).await
    }

    async fn put(&self, db: &str, doc: DocumentWrite) -> StoreResult<String> {
        if self.put_fails(&doc.id) {
            return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
        }
        self.inner.put(db, doc).await
    }

    async fn remove(&self, db: &str, id: &str, rev: &str) -> StoreResult<()> {
        let fail = self.failing_removes.lock().expect("lock").contains(id);
        if fail {
            return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
        }
        self.inner.remove(db, id, rev).await
    }

    async fn create_db(&self, db: &str) -> StoreResult<()> {
        self.inner.create_db(db).await
    }

    async fn destroy_db(&self, db: &str) -> StoreResult<()> {
        self.inner.destroy_db(db).await
    }
}
