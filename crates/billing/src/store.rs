//! Document store contract
//!
//! The reconciler and compactor only ever talk to persistence through
//! this trait: point reads, single-field equality queries, merge/replace
//! writes, and bounded batch writes. Per-document writes are atomic;
//! batches are atomic per batch but not across batches.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Maximum number of operations accepted in a single batch write.
///
/// Matches the per-batch limit of the hosted document stores this
/// contract is modeled on; callers chunk larger write sets.
pub const MAX_BATCH_SIZE: usize = 500;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("batch of {0} operations exceeds the {MAX_BATCH_SIZE}-op limit")]
    BatchTooLarge(usize),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// A stored document: its id within the collection plus its fields as a
/// JSON object.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// A single operation inside a batch write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create or replace; with `merge` the given fields are merged into
    /// the existing document instead of replacing it.
    Set {
        collection: String,
        id: String,
        fields: Value,
        merge: bool,
    },
    /// Merge fields into an existing document; fails the batch if the
    /// document does not exist.
    Update {
        collection: String,
        id: String,
        fields: Value,
    },
}

impl WriteOp {
    pub fn update(collection: &str, id: &str, fields: Value) -> Self {
        WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a single document by id. `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// All documents in `collection` whose top-level `field` equals
    /// `value`. No ordering guarantee.
    async fn query(&self, collection: &str, field: &str, value: &Value)
        -> StoreResult<Vec<Document>>;

    /// All documents in a collection. Only used for small, bounded
    /// collections (the plan catalog).
    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Create or replace a document. With `merge`, fields are merged
    /// into any existing document.
    async fn set(&self, collection: &str, id: &str, fields: Value, merge: bool) -> StoreResult<()>;

    /// Merge fields into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()>;

    /// Apply up to [`MAX_BATCH_SIZE`] operations atomically.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}

/// Merge `incoming` into `base` at the top level (later keys win).
/// Shared by the in-memory backend; the Postgres backend gets the same
/// semantics from jsonb `||`.
pub(crate) fn merge_fields(base: &mut Value, incoming: Value) {
    match (base.as_object_mut(), incoming) {
        (Some(base_map), Value::Object(incoming_map)) => {
            for (k, v) in incoming_map {
                base_map.insert(k, v);
            }
        }
        (_, incoming) => *base = incoming,
    }
}
