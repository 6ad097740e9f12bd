//! In-memory document store
//!
//! Backs tests and local development; the production deployment uses
//! [`PgStore`](super::PgStore). Keeps a log of issued batch sizes so
//! tests can assert on batching behavior.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{merge_fields, Document, DocumentStore, StoreError, StoreResult, WriteOp, MAX_BATCH_SIZE};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    batch_sizes: RwLock<Vec<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of every batch issued through `batch_write`, in order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.read().await.clone()
    }

    /// Total number of documents across all collections.
    pub async fn document_count(&self) -> usize {
        self.collections
            .read()
            .await
            .values()
            .map(|c| c.len())
            .sum()
    }

    fn apply_op(
        collections: &mut HashMap<String, BTreeMap<String, Value>>,
        op: WriteOp,
    ) -> StoreResult<()> {
        match op {
            WriteOp::Set {
                collection,
                id,
                fields,
                merge,
            } => {
                let coll = collections.entry(collection).or_default();
                match coll.get_mut(&id) {
                    Some(existing) if merge => merge_fields(existing, fields),
                    _ => {
                        coll.insert(id, fields);
                    }
                }
                Ok(())
            }
            WriteOp::Update {
                collection,
                id,
                fields,
            } => {
                let existing = collections
                    .get_mut(&collection)
                    .and_then(|c| c.get_mut(&id))
                    .ok_or(StoreError::NotFound {
                        collection: collection.clone(),
                        id: id.clone(),
                    })?;
                merge_fields(existing, fields);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, fields)| fields.get(field) == Some(value))
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set(&self, collection: &str, id: &str, fields: Value, merge: bool) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        Self::apply_op(
            &mut collections,
            WriteOp::Set {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
                merge,
            },
        )
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        Self::apply_op(&mut collections, WriteOp::update(collection, id, fields))
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if ops.len() > MAX_BATCH_SIZE {
            return Err(StoreError::BatchTooLarge(ops.len()));
        }
        self.batch_sizes.write().await.push(ops.len());

        let mut collections = self.collections.write().await;
        for op in ops {
            Self::apply_op(&mut collections, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_merge_keeps_existing_fields() {
        let store = MemoryStore::new();
        store
            .set("tenants", "t1", json!({"plan": "Free", "status": "active"}), false)
            .await
            .unwrap();
        store
            .set("tenants", "t1", json!({"plan": "Pro"}), true)
            .await
            .unwrap();

        let doc = store.get("tenants", "t1").await.unwrap().unwrap();
        assert_eq!(doc.fields["plan"], "Pro");
        assert_eq!(doc.fields["status"], "active");
    }

    #[tokio::test]
    async fn set_without_merge_replaces() {
        let store = MemoryStore::new();
        store
            .set("tenants", "t1", json!({"plan": "Free", "status": "active"}), false)
            .await
            .unwrap();
        store
            .set("tenants", "t1", json!({"plan": "Pro"}), false)
            .await
            .unwrap();

        let doc = store.get("tenants", "t1").await.unwrap().unwrap();
        assert!(doc.fields.get("status").is_none());
    }

    #[tokio::test]
    async fn update_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("tenants", "nope", json!({"plan": "Pro"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn query_matches_top_level_field() {
        let store = MemoryStore::new();
        store
            .set("tenants", "t1", json!({"customerId": "cus_1"}), false)
            .await
            .unwrap();
        store
            .set("tenants", "t2", json!({"customerId": "cus_2"}), false)
            .await
            .unwrap();

        let hits = store
            .query("tenants", "customerId", &json!("cus_2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t2");
    }

    #[tokio::test]
    async fn oversized_batch_rejected() {
        let store = MemoryStore::new();
        let ops: Vec<WriteOp> = (0..MAX_BATCH_SIZE + 1)
            .map(|i| WriteOp::Set {
                collection: "transactions".into(),
                id: format!("tx{i}"),
                fields: json!({}),
                merge: false,
            })
            .collect();
        let err = store.batch_write(ops).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge(n) if n == MAX_BATCH_SIZE + 1));
    }
}
