//! `KvBackend`: the seam a DynamoDB-shaped key-value store implements.
//!
//! Models partition key / sort key addressing, conditional writes, and
//! atomic numeric updates — the primitives spec §4.1/§4.5/§6 need — without
//! depending on a real AWS SDK. [`InMemoryKvBackend`] is the reference
//! implementation used by tests and by [`crate::cloud::CloudKvStore`] when
//! no AWS credentials are configured.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Result, StoreError};

/// A stored item, keyed by `(pk, sk)`, with an optional TTL.
#[derive(Debug, Clone)]
pub struct KvItem {
    pub item: Value,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn key(pk: &str, sk: &str) -> String {
    format!("{pk}#{sk}")
}

/// Behavior a DynamoDB-style table needs to expose for this system:
/// point reads, conditional ("insert if absent") writes, atomic numeric
/// ADD updates, sort-key prefix queries (the GSI access pattern), and a
/// delete-then-put used by compaction to replace a session's compaction
/// state in one step.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Value>>;

    /// Insert `item` only if no item exists at `(pk, sk)`. Returns `true`
    /// if the insert happened, `false` if an item was already present
    /// (the DynamoDB `ConditionalCheckFailedException` case, modeled as a
    /// plain boolean instead of an error since callers generally treat
    /// "already present" as an expected, not exceptional, outcome).
    async fn put_item_if_absent(&self, pk: &str, sk: &str, item: Value, ttl_seconds: Option<i64>) -> Result<bool>;

    /// Atomically mutate the JSON object stored at `(pk, sk)`, creating it
    /// from `default` first if absent. `mutate` runs under the shard's
    /// lock so concurrent callers never interleave a read-modify-write —
    /// this is the ADD-expression semantics of spec §4.5 generalized to
    /// arbitrary numeric/nested-map updates instead of one fixed field.
    async fn atomic_add(
        &self,
        pk: &str,
        sk: &str,
        default: Value,
        mutate: Box<dyn FnOnce(&mut Map<String, Value>) + Send>,
    ) -> Result<Value>;

    /// Items whose sort key starts with `sk_prefix`, ordered by sort key.
    /// Models a GSI query (e.g. all messages for a session, all rollups
    /// for a period).
    async fn query_begins_with(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Value>>;

    /// Replace whatever is stored at `(pk, sk)` unconditionally.
    async fn delete_then_put(&self, pk: &str, sk: &str, item: Value) -> Result<()>;
}

/// In-process reference implementation backed by a `DashMap`. Not
/// durable across restarts; exists so `CloudKvStore` and `agentcore-cost`
/// are fully testable and runnable without AWS credentials.
#[derive(Default, Clone)]
pub struct InMemoryKvBackend {
    items: Arc<DashMap<String, KvItem>>,
}

impl InMemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(item: &KvItem) -> bool {
        item.expires_at
            .map(|exp| exp < chrono::Utc::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Value>> {
        let k = key(pk, sk);
        match self.items.get(&k) {
            Some(entry) if !Self::is_expired(&entry) => Ok(Some(entry.item.clone())),
            Some(_) => {
                self.items.remove(&k);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_item_if_absent(&self, pk: &str, sk: &str, item: Value, ttl_seconds: Option<i64>) -> Result<bool> {
        let k = key(pk, sk);
        if let Some(existing) = self.items.get(&k) {
            if !Self::is_expired(&existing) {
                return Ok(false);
            }
        }
        let expires_at = ttl_seconds.map(|s| chrono::Utc::now() + chrono::Duration::seconds(s));
        self.items.insert(k, KvItem { item, expires_at });
        Ok(true)
    }

    async fn atomic_add(
        &self,
        pk: &str,
        sk: &str,
        default: Value,
        mutate: Box<dyn FnOnce(&mut Map<String, Value>) + Send>,
    ) -> Result<Value> {
        let k = key(pk, sk);
        let mut entry = self
            .items
            .entry(k)
            .or_insert_with(|| KvItem {
                item: default,
                expires_at: None,
            });
        let obj = entry
            .item
            .as_object_mut()
            .ok_or_else(|| StoreError::Backend("atomic_add target is not a JSON object".into()))?;
        mutate(obj);
        Ok(entry.item.clone())
    }

    async fn query_begins_with(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Value>> {
        let full_prefix = format!("{pk}#{sk_prefix}");
        let mut matches: Vec<(String, Value)> = self
            .items
            .iter()
            .filter(|e| e.key().starts_with(&full_prefix) && !Self::is_expired(e.value()))
            .map(|e| (e.key().clone(), e.value().item.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches.into_iter().map(|(_, v)| v).collect())
    }

    async fn delete_then_put(&self, pk: &str, sk: &str, item: Value) -> Result<()> {
        let k = key(pk, sk);
        self.items.insert(k, KvItem { item, expires_at: None });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_if_absent_fails_on_second_write() {
        let backend = InMemoryKvBackend::new();
        assert!(backend
            .put_item_if_absent("PK1", "SK1", json!({"v": 1}), None)
            .await
            .unwrap());
        assert!(!backend
            .put_item_if_absent("PK1", "SK1", json!({"v": 2}), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn atomic_add_accumulates_under_concurrent_callers() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend
                    .atomic_add(
                        "PK1",
                        "SK1",
                        json!({"total": 0.0}),
                        Box::new(|obj| {
                            let current = obj.get("total").and_then(|v| v.as_f64()).unwrap_or(0.0);
                            obj.insert("total".into(), json!(current + 1.0));
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let result = backend.get_item("PK1", "SK1").await.unwrap().unwrap();
        assert_eq!(result["total"].as_f64().unwrap(), 50.0);
    }

    #[tokio::test]
    async fn query_begins_with_returns_sorted_matches() {
        let backend = InMemoryKvBackend::new();
        backend.delete_then_put("PK1", "MSG#2", json!({"n": 2})).await.unwrap();
        backend.delete_then_put("PK1", "MSG#1", json!({"n": 1})).await.unwrap();
        backend.delete_then_put("PK1", "OTHER#1", json!({"n": 9})).await.unwrap();
        let results = backend.query_begins_with("PK1", "MSG#").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["n"], 1);
        assert_eq!(results[1]["n"], 2);
    }

    #[tokio::test]
    async fn expired_ttl_item_reads_as_absent() {
        let backend = InMemoryKvBackend::new();
        backend
            .put_item_if_absent("PK1", "SK1", json!({"v": 1}), Some(-1))
            .await
            .unwrap();
        assert!(backend.get_item("PK1", "SK1").await.unwrap().is_none());
    }
}
