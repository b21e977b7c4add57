//! Abstract transactional document store the engine is built against.
//!
//! Built on a version-column optimistic-concurrency pattern,
//! generalized from typed Postgres rows to an arbitrary
//! collection-of-documents backend (Firestore-shaped: get/set/query plus
//! transactions). Two implementations ship: [`memory::MemoryStore`]
//! (always available, used by every test in this crate) and
//! [`postgres::PostgresStore`] behind the `postgres-store` feature. Both
//! honor `Transaction::set`'s `expected_version`, surfacing a lost race
//! as `StoreError::Conflict` rather than silently clobbering a concurrent
//! writer.

pub mod memory;
#[cfg(feature = "postgres-store")]
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Logical collection names for the engine's persisted state.
pub mod collections {
    pub const USERS: &str = "users_quota";
    pub const SUBSCRIPTIONS: &str = "subscriptions_quota";
    pub const WALLETS: &str = "quota_wallets";
    pub const USAGES: &str = "quota_usages";
    pub const WEBHOOK_EVENTS: &str = "webhook_events";
}

pub type DocumentId = String;

/// A single stored document. `version` increments on every write;
/// `Transaction::set` callers that read a document before writing it
/// back pass its `version` as `expected_version` to detect a lost race.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub version: u64,
    pub body: Value,
}

impl Document {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.body.clone())
            .map_err(|err| StoreError::Backend(format!("decode error: {err}")))
    }
}

/// Equality filter over top-level document fields, sufficient for the
/// secondary-index queries this engine needs (`userId` + `status`, etc).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    field_eq: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.field_eq.push((field.to_string(), value.into()));
        self
    }

    fn matches(&self, body: &Value) -> bool {
        self.field_eq
            .iter()
            .all(|(field, expected)| body.get(field).map(|v| v == expected).unwrap_or(false))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic concurrency conflict on {collection}/{id}: expected version {expected}, found {actual}")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;
    async fn set(&self, collection: &str, id: &str, body: Value, merge: bool) -> StoreResult<()>;
    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    /// Applies each `(id, body, merge)` write independently; a failure
    /// partway through leaves the prior writes in place. Used for fan-out
    /// updates across an unbounded document set (closing every active
    /// wallet for a user) that the spec explicitly does not require to be
    /// atomic as a group, unlike a single document's read-modify-write.
    async fn batch_set(&self, collection: &str, writes: Vec<(String, Value, bool)>) -> StoreResult<()> {
        for (id, body, merge) in writes {
            self.set(collection, &id, body, merge).await?;
        }
        Ok(())
    }
}

/// A transaction's read/write set. The driver (the backend) is
/// responsible for serializing concurrent transactions that touch the
/// same documents; callers only see either a consistent commit or a
/// `StoreError` they should retry the whole operation against.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Writes `body` to `(collection, id)`. When `expected_version` is
    /// `Some`, the write only applies if the document's current stored
    /// version matches it — otherwise it returns `StoreError::Conflict`
    /// without writing, mirroring a `WHERE version = $n` compare-and-swap.
    /// `None` means an unconditional write: always correct for a document
    /// this transaction has not previously read (there is nothing to
    /// compare against), and used that way throughout this crate.
    async fn set(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
        merge: bool,
        expected_version: Option<u64>,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Firestore-style merge: recursively overlays `patch` onto `base` for
/// object fields, replaces everything else outright.
pub(crate) fn merge_json(mut base: Value, patch: Value) -> Value {
    if let (Value::Object(base_map), Value::Object(patch_map)) = (&mut base, &patch) {
        for (key, value) in patch_map {
            match base_map.get_mut(key) {
                Some(existing) if existing.is_object() && value.is_object() => {
                    *existing = merge_json(existing.clone(), value.clone());
                }
                _ => {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        base
    } else {
        patch
    }
}
