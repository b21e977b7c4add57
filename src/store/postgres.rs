//! Postgres-backed `Store`, gated behind the `postgres-store` feature.
//! Uses the same version/expected-version compare-and-swap pattern as a
//! single typed table would, generalized to a generic
//! `(collection, id) -> jsonb` table so the same trait serves every
//! collection this engine needs.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row};

use super::{merge_json, Document, Filter, Store, StoreError, StoreResult, Transaction};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the backing table if it is not already present. Callers
    /// typically run this once at process startup, alongside any other
    /// migration-on-boot steps.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                version BIGINT NOT NULL DEFAULT 1,
                body JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }
}

fn backend_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn row_to_document(row: PgRow) -> StoreResult<Document> {
    let id: String = row.try_get("id").map_err(backend_err)?;
    let version: i64 = row.try_get("version").map_err(backend_err)?;
    let body: Value = row.try_get("body").map_err(backend_err)?;
    Ok(Document {
        id,
        version: version as u64,
        body,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(row_to_document).transpose()
    }

    async fn set(&self, collection: &str, id: &str, body: Value, merge: bool) -> StoreResult<()> {
        let final_body = if merge {
            let existing: Option<Value> =
                sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                    .bind(collection)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(backend_err)?;
            match existing {
                Some(existing_body) => merge_json(existing_body, body),
                None => body,
            }
        } else {
            body
        };

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, version, body, updated_at)
            VALUES ($1, $2, 1, $3, now())
            ON CONFLICT (collection, id) DO UPDATE
            SET version = documents.version + 1, body = EXCLUDED.body, updated_at = now()
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&final_body)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        rows.into_iter()
            .map(row_to_document)
            .collect::<StoreResult<Vec<_>>>()
            .map(|docs| docs.into_iter().filter(|doc| filter.matches(&doc.body)).collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(backend_err)?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }
}

struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn tx_mut(&mut self) -> &mut sqlx::Transaction<'static, Postgres> {
        self.tx.as_mut().expect("transaction already committed")
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *self.tx_mut())
            .await
            .map_err(backend_err)?;
        row.map(row_to_document).transpose()
    }

    async fn set(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
        merge: bool,
        expected_version: Option<u64>,
    ) -> StoreResult<()> {
        let final_body = if merge {
            let existing: Option<Value> =
                sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                    .bind(collection)
                    .bind(id)
                    .fetch_optional(&mut *self.tx_mut())
                    .await
                    .map_err(backend_err)?;
            match existing {
                Some(existing_body) => merge_json(existing_body, body),
                None => body,
            }
        } else {
            body
        };

        // WHERE only gates the ON CONFLICT branch: a document that does
        // not exist yet always inserts regardless of `expected_version`,
        // matching the cited `runtime_vm_trust_registry` upsert pattern.
        let applied_version: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO documents (collection, id, version, body, updated_at)
            VALUES ($1, $2, 1, $3, now())
            ON CONFLICT (collection, id) DO UPDATE
            SET version = documents.version + 1, body = EXCLUDED.body, updated_at = now()
            WHERE $4::bigint IS NULL OR documents.version = $4
            RETURNING version
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&final_body)
        .bind(expected_version.map(|v| v as i64))
        .fetch_optional(&mut *self.tx_mut())
        .await
        .map_err(backend_err)?;

        if applied_version.is_some() {
            return Ok(());
        }

        let actual: i64 = sqlx::query_scalar("SELECT version FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_one(&mut *self.tx_mut())
            .await
            .map_err(backend_err)?;

        Err(StoreError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
            expected: expected_version.unwrap_or_default(),
            actual: actual as u64,
        })
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let tx = self.tx.take().expect("transaction already committed");
        tx.commit().await.map_err(backend_err)
    }
}
