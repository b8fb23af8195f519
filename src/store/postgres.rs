use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgPool};

use super::{Document, DocumentStore, DocumentWrite, StoreError, StoreResult, next_revision};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_document_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct DocumentRow {
    doc_id: String,
    rev: String,
    body: serde_json::Value,
}

impl From<DocumentRow> for Document {
    fn from(value: DocumentRow) -> Self {
        Self {
            id: value.doc_id,
            rev: value.rev,
            body: value.body,
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow!(err))
}

fn insert_error(db: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_foreign_key_violation() {
            return StoreError::missing_database(db);
        }
    }
    backend(err)
}

/// Document store keeping every logical database as rows of
/// `twiglet.documents`, with revisions enforced by conditional updates.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Arc<PgPool>,
}

impl PgDocumentStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    async fn ensure_db(&self, db: &str) -> StoreResult<()> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM twiglet.databases
                WHERE db_name = $1
            )
            "#,
        )
        .bind(db)
        .fetch_one(&*self.pool)
        .await
        .map_err(backend)?;

        if exists.0 {
            Ok(())
        } else {
            Err(StoreError::missing_database(db))
        }
    }
}

impl DocumentStore for PgDocumentStore {
    async fn get(&self, db: &str, id: &str) -> StoreResult<Document> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT doc_id, rev, body
            FROM twiglet.documents
            WHERE db_name = $1
              AND doc_id = $2
            "#,
        )
        .bind(db)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(Document::from(row)),
            None => {
                self.ensure_db(db).await?;
                Err(StoreError::not_found(db, id))
            }
        }
    }

    async fn all_docs(&self, db: &str, keys: Option<&[&str]>) -> StoreResult<Vec<Document>> {
        self.ensure_db(db).await?;

        let Some(keys) = keys else {
            let rows = sqlx::query_as::<_, DocumentRow>(
                r#"
                SELECT doc_id, rev, body
                FROM twiglet.documents
                WHERE db_name = $1
                ORDER BY doc_id ASC
                "#,
            )
            .bind(db)
            .fetch_all(&*self.pool)
            .await
            .map_err(backend)?;
            return Ok(rows.into_iter().map(Document::from).collect());
        };

        let key_list: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT doc_id, rev, body
            FROM twiglet.documents
            WHERE db_name = $1
              AND doc_id = ANY($2)
            "#,
        )
        .bind(db)
        .bind(&key_list)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend)?;

        let mut by_id: std::collections::HashMap<String, Document> = rows
            .into_iter()
            .map(|row| (row.doc_id.clone(), Document::from(row)))
            .collect();
        keys.iter()
            .map(|key| {
                by_id
                    .remove(*key)
                    .ok_or_else(|| StoreError::not_found(db, key))
            })
            .collect()
    }

    async fn put(&self, db: &str, doc: DocumentWrite) -> StoreResult<String> {
        let rev = next_revision(doc.rev.as_deref());
        let result = match &doc.rev {
            None => sqlx::query(
                r#"
                INSERT INTO twiglet.documents (db_name, doc_id, rev, body)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (db_name, doc_id) DO NOTHING
                "#,
            )
            .bind(db)
            .bind(&doc.id)
            .bind(&rev)
            .bind(&doc.body)
            .execute(&*self.pool)
            .await
            .map_err(|err| insert_error(db, err))?,
            Some(expected) => sqlx::query(
                r#"
                UPDATE twiglet.documents
                SET rev = $1,
                    body = $2,
                    updated_at = CURRENT_TIMESTAMP
                WHERE db_name = $3
                  AND doc_id = $4
                  AND rev = $5
                "#,
            )
            .bind(&rev)
            .bind(&doc.body)
            .bind(db)
            .bind(&doc.id)
            .bind(expected)
            .execute(&*self.pool)
            .await
            .map_err(backend)?,
        };

        if result.rows_affected() == 0 {
            self.ensure_db(db).await?;
            return Err(StoreError::conflict(db, &doc.id));
        }
        Ok(rev)
    }

    async fn remove(&self, db: &str, id: &str, rev: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM twiglet.documents
            WHERE db_name = $1
              AND doc_id = $2
              AND rev = $3
            "#,
        )
        .bind(db)
        .bind(id)
        .bind(rev)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(db, id).await {
            Ok(_) => Err(StoreError::conflict(db, id)),
            Err(err) => Err(err),
        }
    }

    async fn create_db(&self, db: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO twiglet.databases (db_name)
            VALUES ($1)
            ON CONFLICT (db_name) DO NOTHING
            "#,
        )
        .bind(db)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn destroy_db(&self, db: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM twiglet.databases
            WHERE db_name = $1
            "#,
        )
        .bind(db)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::missing_database(db));
        }
        Ok(())
    }
}
