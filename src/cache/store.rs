//! Key-value store seam and the in-process implementation.
//!
//! The cache layer talks to a hash-oriented store (Redis semantics): one hash
//! per entity view, plus plain string values for lock markers and negative
//! sentinels.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

/// Raw hash content as held by the store.
pub type RawHash = BTreeMap<String, String>;

/// Stored type of a key, as reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    None,
    String,
    Hash,
    List,
    Set,
    ZSet,
    Other,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("operation against a key holding the wrong kind of value: `{key}`")]
    WrongType { key: String },
    #[error("key-value store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }
}

/// Narrow key-value interface consumed by the entity cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn type_of(&self, key: &str) -> Result<TypeTag, StoreError>;

    /// Whole-hash read; an absent key reads as an empty hash.
    async fn read_hash(&self, key: &str) -> Result<RawHash, StoreError>;

    /// Merge `fields` into the hash at `key`, creating it when absent.
    async fn write_hash_merge(&self, key: &str, fields: &RawHash) -> Result<bool, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn set_scalar_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<bool, StoreError>;

    async fn set_scalar(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn get_scalar(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unlink `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

// ============================================================================
// Connections
// ============================================================================

/// Named store handles, resolved from an entity's configured connection name.
#[derive(Clone, Default)]
pub struct StoreConnections {
    stores: HashMap<String, Arc<dyn KeyValueStore>>,
}

impl StoreConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        self.insert(name, store);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, store: Arc<dyn KeyValueStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn KeyValueStore>> {
        self.stores.get(name).cloned()
    }
}

// ============================================================================
// In-process store
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(RawHash),
    List(Vec<String>),
}

impl Value {
    fn type_tag(&self) -> TypeTag {
        match self {
            Self::String(_) => TypeTag::String,
            Self::Hash(_) => TypeTag::Hash,
            Self::List(_) => TypeTag::List,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store with Redis-like typing and lazy expiry.
///
/// Expired keys are dropped on the next access. Time is read from the tokio
/// clock so paused-time tests can step over expiries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self, key: &str) {
        let now = Instant::now();
        self.slots.remove_if(key, |_, slot| slot.is_expired(now));
    }

    fn snapshot(&self, key: &str) -> Option<Value> {
        self.purge_expired(key);
        self.slots.get(key).map(|slot| slot.value.clone())
    }

    /// Store a list value; lets callers plant a foreign type at a cache key.
    pub fn set_list(&self, key: &str, items: Vec<String>) {
        self.slots
            .insert(key.to_string(), Slot::persistent(Value::List(items)));
    }

    /// Items of a list value; `None` when the key is absent or holds another type.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.snapshot(key)? {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Remaining time to live, `None` when the key is absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_expired(key);
        let slot = self.slots.get(key)?;
        slot.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.purge_expired(key);
        Ok(self.slots.contains_key(key))
    }

    async fn type_of(&self, key: &str) -> Result<TypeTag, StoreError> {
        Ok(self
            .snapshot(key)
            .map_or(TypeTag::None, |value| value.type_tag()))
    }

    async fn read_hash(&self, key: &str) -> Result<RawHash, StoreError> {
        match self.snapshot(key) {
            None => Ok(RawHash::new()),
            Some(Value::Hash(hash)) => Ok(hash),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn write_hash_merge(&self, key: &str, fields: &RawHash) -> Result<bool, StoreError> {
        if fields.is_empty() {
            return Ok(false);
        }
        self.purge_expired(key);
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::persistent(Value::Hash(RawHash::new())));
        match &mut slot.value {
            Value::Hash(hash) => {
                hash.extend(
                    fields
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone())),
                );
                Ok(true)
            }
            _ => Err(StoreError::wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.purge_expired(key);
        if ttl.is_zero() {
            return Ok(self.slots.remove(key).is_some());
        }
        match self.slots.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_scalar_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<bool, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::Backend(format!(
                "invalid expire time for `{key}`"
            )));
        }
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::String(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set_scalar(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.slots.insert(
            key.to_string(),
            Slot::persistent(Value::String(value.to_string())),
        );
        Ok(true)
    }

    async fn get_scalar(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.snapshot(key) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.purge_expired(key);
        Ok(self.slots.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(pairs: &[(&str, &str)]) -> RawHash {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn hash_merge_keeps_untouched_fields() {
        let store = MemoryStore::new();
        store
            .write_hash_merge("user:1", &hash(&[("id", "1"), ("name", "\"A\"")]))
            .await
            .expect("write");
        store
            .write_hash_merge("user:1", &hash(&[("name", "\"B\"")]))
            .await
            .expect("merge");

        let stored = store.read_hash("user:1").await.expect("read");
        assert_eq!(stored, hash(&[("id", "1"), ("name", "\"B\"")]));
        assert_eq!(store.type_of("user:1").await.expect("type"), TypeTag::Hash);
    }

    #[tokio::test]
    async fn hash_operations_reject_scalars() {
        let store = MemoryStore::new();
        store.set_scalar("user:1", "plain").await.expect("set");

        assert!(matches!(
            store.read_hash("user:1").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.write_hash_merge("user:1", &hash(&[("id", "1")])).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn absent_key_reads_as_empty() {
        let store = MemoryStore::new();
        assert!(!store.exists("missing").await.expect("exists"));
        assert_eq!(store.type_of("missing").await.expect("type"), TypeTag::None);
        assert!(store.read_hash("missing").await.expect("read").is_empty());
        assert_eq!(store.get_scalar("missing").await.expect("get"), None);
        assert!(!store.delete("missing").await.expect("delete"));
    }

    #[tokio::test]
    async fn empty_merge_writes_nothing() {
        let store = MemoryStore::new();
        assert!(!store
            .write_hash_merge("user:1", &RawHash::new())
            .await
            .expect("merge"));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_applied_lazily() {
        let store = MemoryStore::new();
        store
            .set_scalar_with_expiry("neg", Duration::from_secs(300), "data invalid")
            .await
            .expect("setex");
        assert!(store.ttl("neg").is_some());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.exists("neg").await.expect("exists"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("neg").await.expect("exists"));
    }

    #[tokio::test]
    async fn set_scalar_clears_previous_expiry() {
        let store = MemoryStore::new();
        store
            .set_scalar_with_expiry("lock", Duration::from_secs(5), "1")
            .await
            .expect("setex");
        store.set_scalar("lock", "1").await.expect("set");
        assert_eq!(store.ttl("lock"), None);
    }

    #[tokio::test]
    async fn expire_on_absent_key_reports_false() {
        let store = MemoryStore::new();
        assert!(!store
            .expire("missing", Duration::from_secs(10))
            .await
            .expect("expire"));
    }

    #[tokio::test]
    async fn connections_resolve_by_name() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let connections = StoreConnections::new().with("default", store);
        assert!(connections.get("default").is_some());
        assert!(connections.get("sessions").is_none());
    }

    #[tokio::test]
    async fn list_values_report_their_type() {
        let store = MemoryStore::new();
        store.set_list("queue", vec!["a".to_string(), "b".to_string()]);

        assert_eq!(store.type_of("queue").await.expect("type"), TypeTag::List);
        assert_eq!(
            store.list("queue"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(matches!(
            store.read_hash("queue").await,
            Err(StoreError::WrongType { .. })
        ));

        store.set_scalar("queue", "x").await.expect("overwrite");
        assert_eq!(store.list("queue"), None);
    }
}
