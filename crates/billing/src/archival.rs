//! Archival compactor
//!
//! When a tenant lands on the free tier it may keep at most
//! [`RETENTION_LIMIT`] non-archived ledger transactions. The compactor
//! marks the oldest excess entries archived, in bounded batches.
//! Archiving is monotonic: this subsystem never unsets the flag, so
//! re-running on an already-compacted tenant is a no-op.
//!
//! Known race, accepted by design: a transaction created while
//! compaction runs may be counted as excess and archived. Batches are
//! atomic individually but not collectively; a crash mid-run only
//! leaves too many entries retained, and the next run converges.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::store::{DocumentStore, WriteOp};
use crate::tenant::collections;

/// Maximum non-archived transactions a free-tier tenant retains.
pub const RETENTION_LIMIT: usize = 50;

/// The slice of a transaction document the compactor cares about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerEntry {
    #[serde(skip)]
    id: String,
    #[serde(default)]
    archived: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    date: Option<OffsetDateTime>,
}

pub struct ArchivalCompactor {
    store: Arc<dyn DocumentStore>,
    retention: usize,
}

impl ArchivalCompactor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            retention: RETENTION_LIMIT,
        }
    }

    /// Override the retention bound. Test hook and escape hatch for
    /// per-deployment tuning.
    pub fn with_retention(store: Arc<dyn DocumentStore>, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Archive everything beyond the Nth newest non-archived
    /// transaction of a tenant. Returns the number of entries archived.
    pub async fn compact(&self, tenant_id: &str) -> BillingResult<usize> {
        let docs = self
            .store
            .query(collections::TRANSACTIONS, "tenantId", &json!(tenant_id))
            .await?;

        let mut entries: Vec<LedgerEntry> = docs
            .iter()
            .filter_map(|doc| {
                match serde_json::from_value::<LedgerEntry>(doc.fields.clone()) {
                    Ok(mut entry) => {
                        entry.id = doc.id.clone();
                        Some(entry)
                    }
                    Err(e) => {
                        // Malformed entries are left alone rather than
                        // guessed at.
                        tracing::warn!(
                            tenant_id = %tenant_id,
                            transaction_id = %doc.id,
                            error = %e,
                            "Skipping unreadable transaction during compaction"
                        );
                        None
                    }
                }
            })
            .filter(|entry| !entry.archived)
            .collect();

        if entries.len() <= self.retention {
            tracing::debug!(
                tenant_id = %tenant_id,
                non_archived = entries.len(),
                retention = self.retention,
                "Compaction not needed"
            );
            return Ok(0);
        }

        // Newest first; entries without a date sort last and are
        // archived before dated ones.
        entries.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
        let excess = &entries[self.retention..];

        let archived_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| BillingError::Archival(e.to_string()))?;

        let ops: Vec<WriteOp> = excess
            .iter()
            .map(|entry| {
                WriteOp::update(
                    collections::TRANSACTIONS,
                    &entry.id,
                    json!({ "archived": true, "archivedAt": archived_at }),
                )
            })
            .collect();

        let batch_size = self.store.max_batch_size();
        let batches = ops.len().div_ceil(batch_size);
        for chunk in ops.chunks(batch_size) {
            self.store.batch_write(chunk.to_vec()).await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            archived = excess.len(),
            batches = batches,
            retention = self.retention,
            "Archived excess transactions"
        );

        Ok(excess.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use time::Duration;

    /// Seed `count` non-archived transactions for a tenant, oldest
    /// first (tx0 is the oldest).
    async fn seed_transactions(store: &MemoryStore, tenant_id: &str, count: usize) {
        let base = time::macros::datetime!(2026-01-01 00:00:00 UTC);
        for i in 0..count {
            let date = (base + Duration::days(i as i64))
                .format(&Rfc3339)
                .unwrap();
            store
                .set(
                    collections::TRANSACTIONS,
                    &format!("tx{i:05}"),
                    json!({
                        "tenantId": tenant_id,
                        "date": date,
                        "amountCents": 1000 + i as i64,
                        "archived": false,
                    }),
                    false,
                )
                .await
                .unwrap();
        }
    }

    async fn archived_ids(store: &MemoryStore) -> Vec<String> {
        store
            .query(collections::TRANSACTIONS, "archived", &json!(true))
            .await
            .unwrap()
            .into_iter()
            .map(|doc| doc.id)
            .collect()
    }

    #[tokio::test]
    async fn archives_oldest_excess_then_converges() {
        let store = Arc::new(MemoryStore::new());
        seed_transactions(&store, "t1", 73).await;
        let compactor = ArchivalCompactor::new(store.clone());

        let archived = compactor.compact("t1").await.unwrap();
        assert_eq!(archived, 23);

        // The 23 oldest (tx00000..tx00022) are the ones archived.
        let mut ids = archived_ids(&store).await;
        ids.sort();
        assert_eq!(ids.len(), 23);
        assert_eq!(ids.first().map(String::as_str), Some("tx00000"));
        assert_eq!(ids.last().map(String::as_str), Some("tx00022"));

        // Second consecutive run archives nothing.
        let archived = compactor.compact("t1").await.unwrap();
        assert_eq!(archived, 0);
    }

    #[tokio::test]
    async fn under_limit_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        seed_transactions(&store, "t1", 50).await;
        let compactor = ArchivalCompactor::new(store.clone());

        assert_eq!(compactor.compact("t1").await.unwrap(), 0);
        assert!(archived_ids(&store).await.is_empty());
    }

    #[tokio::test]
    async fn large_backlog_is_batched() {
        let store = Arc::new(MemoryStore::new());
        seed_transactions(&store, "t1", 1200).await;
        // Retention 0 so all 1200 entries are excess.
        let compactor = ArchivalCompactor::with_retention(store.clone(), 0);

        let archived = compactor.compact("t1").await.unwrap();
        assert_eq!(archived, 1200);
        assert_eq!(store.batch_sizes().await, vec![500, 500, 200]);
        assert_eq!(archived_ids(&store).await.len(), 1200);
    }

    #[tokio::test]
    async fn other_tenants_are_untouched() {
        let store = Arc::new(MemoryStore::new());
        seed_transactions(&store, "t1", 60).await;
        store
            .set(
                collections::TRANSACTIONS,
                "other",
                json!({ "tenantId": "t2", "archived": false }),
                false,
            )
            .await
            .unwrap();

        let compactor = ArchivalCompactor::new(store.clone());
        assert_eq!(compactor.compact("t1").await.unwrap(), 10);

        let other = store
            .get(collections::TRANSACTIONS, "other")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.fields["archived"], false);
    }

    #[tokio::test]
    async fn entries_without_dates_archive_first() {
        let store = Arc::new(MemoryStore::new());
        seed_transactions(&store, "t1", 3).await;
        store
            .set(
                collections::TRANSACTIONS,
                "undated",
                json!({ "tenantId": "t1", "archived": false }),
                false,
            )
            .await
            .unwrap();

        let compactor = ArchivalCompactor::with_retention(store.clone(), 3);
        assert_eq!(compactor.compact("t1").await.unwrap(), 1);
        assert_eq!(archived_ids(&store).await, vec!["undated".to_string()]);
    }
}
