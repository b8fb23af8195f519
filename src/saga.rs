//! Multi-document writes without store transactions.
//!
//! A saga holds an ordered list of single-document writes. All writes are
//! issued concurrently; if any fails, the ones that landed are compensated
//! in reverse order (replaced documents get their previous body back,
//! created documents are removed). Compensation is best-effort: if it also
//! fails, an [`InconsistencyRecord`] is logged and returned for operator
//! remediation.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::store::{Document, DocumentStore, DocumentWrite, StoreError};

#[derive(Debug, Clone)]
enum Undo {
    Restore(Value),
    Remove,
}

#[derive(Debug, Clone)]
pub struct WriteStep {
    pub label: &'static str,
    pub db: String,
    pub write: DocumentWrite,
    undo: Undo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedWrite {
    pub label: &'static str,
    pub db: String,
    pub id: String,
    pub rev: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InconsistencyRecord {
    pub saga_id: Uuid,
    pub operation: &'static str,
    pub failed_steps: Vec<String>,
    /// Steps that landed and could not be undone.
    pub unrecovered_steps: Vec<String>,
}

#[derive(Debug)]
pub struct SagaFailure {
    pub saga_id: Uuid,
    pub failures: Vec<(&'static str, StoreError)>,
    pub inconsistency: Option<InconsistencyRecord>,
}

impl SagaFailure {
    /// True when every failed step lost an optimistic revision race and all
    /// landed steps were undone.
    pub fn is_clean_conflict(&self) -> bool {
        self.inconsistency.is_none() && self.failures.iter().all(|(_, err)| err.is_conflict())
    }

    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|(label, err)| format!("{label}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug)]
pub struct WriteSaga {
    id: Uuid,
    operation: &'static str,
    steps: Vec<WriteStep>,
}

impl WriteSaga {
    pub fn new(operation: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            steps: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Replaces `current`, guarded by the revision it was read at.
    pub fn replace(mut self, label: &'static str, db: &str, current: &Document, body: Value) -> Self {
        self.steps.push(WriteStep {
            label,
            db: db.to_string(),
            write: DocumentWrite::replace(current, body),
            undo: Undo::Restore(current.body.clone()),
        });
        self
    }

    pub fn create(mut self, label: &'static str, db: &str, id: &str, body: Value) -> Self {
        self.steps.push(WriteStep {
            label,
            db: db.to_string(),
            write: DocumentWrite::create(id, body),
            undo: Undo::Remove,
        });
        self
    }

    pub async fn commit<S: DocumentStore>(
        self,
        store: &S,
    ) -> std::result::Result<Vec<AppliedWrite>, SagaFailure> {
        let results = join_all(
            self.steps
                .iter()
                .map(|step| store.put(&step.db, step.write.clone())),
        )
        .await;

        let mut applied = Vec::with_capacity(self.steps.len());
        let mut failures = Vec::new();
        for (step, result) in self.steps.iter().zip(results) {
            match result {
                Ok(rev) => applied.push((step, rev)),
                Err(err) => failures.push((step.label, err)),
            }
        }

        if failures.is_empty() {
            return Ok(applied
                .into_iter()
                .map(|(step, rev)| AppliedWrite {
                    label: step.label,
                    db: step.db.clone(),
                    id: step.write.id.clone(),
                    rev,
                })
                .collect());
        }

        tracing::warn!(
            saga_id = %self.id,
            operation = self.operation,
            failed = failures.len(),
            applied = applied.len(),
            "saga step failed, compensating applied writes"
        );

        let mut unrecovered = Vec::new();
        for (step, rev) in applied.iter().rev() {
            if let Err(err) = compensate(store, step, rev).await {
                tracing::error!(
                    saga_id = %self.id,
                    step = step.label,
                    db = %step.db,
                    doc = %step.write.id,
                    error = %err,
                    "saga compensation failed"
                );
                unrecovered.push(step.label.to_string());
            }
        }

        let inconsistency = if unrecovered.is_empty() {
            None
        } else {
            let record = InconsistencyRecord {
                saga_id: self.id,
                operation: self.operation,
                failed_steps: failures.iter().map(|(label, _)| label.to_string()).collect(),
                unrecovered_steps: unrecovered,
            };
            tracing::error!(
                saga_id = %record.saga_id,
                operation = record.operation,
                failed_steps = ?record.failed_steps,
                unrecovered_steps = ?record.unrecovered_steps,
                "documents left inconsistent"
            );
            Some(record)
        };

        Err(SagaFailure {
            saga_id: self.id,
            failures,
            inconsistency,
        })
    }
}

async fn compensate<S: DocumentStore>(
    store: &S,
    step: &WriteStep,
    rev: &str,
) -> std::result::Result<(), StoreError> {
    match &step.undo {
        Undo::Restore(previous) => {
            let write = DocumentWrite {
                id: step.write.id.clone(),
                rev: Some(rev.to_string()),
                body: previous.clone(),
            };
            store.put(&step.db, write).await.map(|_| ())
        }
        Undo::Remove => store.remove(&step.db, &step.write.id, rev).await,
    }
}
