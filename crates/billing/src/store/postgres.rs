//! Postgres-backed document store
//!
//! One `documents` table keyed by (collection, id) with a jsonb payload.
//! Merge semantics come from jsonb `||`; batch writes run inside a
//! single transaction so each batch is atomic.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{Document, DocumentStore, StoreError, StoreResult, WriteOp, MAX_BATCH_SIZE};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool settings used across the service.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_op<'e, E>(executor: E, op: &WriteOp) -> StoreResult<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        match op {
            WriteOp::Set {
                collection,
                id,
                fields,
                merge,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (collection, id, data)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (collection, id) DO UPDATE SET
                        data = CASE
                            WHEN $4 THEN documents.data || EXCLUDED.data
                            ELSE EXCLUDED.data
                        END,
                        updated_at = NOW()
                    "#,
                )
                .bind(collection)
                .bind(id)
                .bind(fields)
                .bind(merge)
                .execute(executor)
                .await?;
                Ok(())
            }
            WriteOp::Update {
                collection,
                id,
                fields,
            } => {
                let result = sqlx::query(
                    r#"
                    UPDATE documents SET data = data || $3, updated_at = NOW()
                    WHERE collection = $1 AND id = $2
                    "#,
                )
                .bind(collection)
                .bind(id)
                .bind(fields)
                .execute(executor)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound {
                        collection: collection.clone(),
                        id: id.clone(),
                    });
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(fields,)| Document::new(id, fields)))
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        let rows: Vec<(String, Value)> = sqlx::query_as(
            r#"
            SELECT id, data FROM documents
            WHERE collection = $1 AND data -> $2 = $3
            ORDER BY id
            "#,
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, fields)| Document::new(id, fields))
            .collect())
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let rows: Vec<(String, Value)> =
            sqlx::query_as("SELECT id, data FROM documents WHERE collection = $1 ORDER BY id")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, fields)| Document::new(id, fields))
            .collect())
    }

    async fn set(&self, collection: &str, id: &str, fields: Value, merge: bool) -> StoreResult<()> {
        Self::execute_op(
            &self.pool,
            &WriteOp::Set {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
                merge,
            },
        )
        .await
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        Self::execute_op(&self.pool, &WriteOp::update(collection, id, fields)).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if ops.len() > MAX_BATCH_SIZE {
            return Err(StoreError::BatchTooLarge(ops.len()));
        }

        let mut tx = self.pool.begin().await?;
        for op in &ops {
            Self::execute_op(&mut *tx, op).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
