//! In-process `Store` implementation backed by `dashmap`. Always compiled;
//! every test in this crate runs against it.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{merge_json, Document, Filter, Store, StoreError, StoreResult, Transaction};

#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<DashMap<String, DashMap<String, Document>>>,
    transaction_lock: Arc<Mutex<()>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
            transaction_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Shared write path for both the plain `Store::set` (always
    /// `expected_version: None`) and `Transaction::set` (which may pass a
    /// version read earlier in the same transaction). A document that
    /// does not yet exist is always inserted, regardless of
    /// `expected_version` — there is nothing to compare against yet.
    fn write(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        merge: bool,
        expected_version: Option<u64>,
    ) -> StoreResult<()> {
        let shard = self
            .collections
            .entry(collection.to_string())
            .or_insert_with(DashMap::new);
        let existing = shard.get(id).map(|entry| entry.clone());

        if let (Some(expected), Some(doc)) = (expected_version, &existing) {
            if doc.version != expected {
                return Err(StoreError::Conflict {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    expected,
                    actual: doc.version,
                });
            }
        }

        let next_version = existing.as_ref().map(|doc| doc.version + 1).unwrap_or(1);
        let final_body = match (merge, existing) {
            (true, Some(doc)) => merge_json(doc.body, body),
            _ => body,
        };
        shard.insert(
            id.to_string(),
            Document {
                id: id.to_string(),
                version: next_version,
                body: final_body,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|shard| shard.get(id).map(|entry| entry.clone())))
    }

    async fn set(&self, collection: &str, id: &str, body: Value, merge: bool) -> StoreResult<()> {
        self.write(collection, id, body, merge, None)
    }

    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self
            .collections
            .get(collection)
            .map(|shard| {
                shard
                    .iter()
                    .filter(|entry| filter.matches(&entry.value().body))
                    .map(|entry| entry.value().clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = self.transaction_lock.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            _guard: guard,
        }))
    }
}

/// Holds the store's single transaction lock for its lifetime, so every
/// get/set pair it performs is serialized against other transactions.
/// Writes are applied directly (there is no buffered rollback) because
/// every caller in this crate only calls `set` after it has already
/// decided to commit; nothing here ever needs to undo a write.
struct MemoryTransaction {
    store: MemoryStore,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.store.get(collection, id).await
    }

    async fn set(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
        merge: bool,
        expected_version: Option<u64>,
    ) -> StoreResult<()> {
        self.store.write(collection, id, body, merge, expected_version)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
