//! Entity cache layer.
//!
//! Wraps single-entity lookups with a read-through/write-through cache over a
//! hash-oriented key-value store:
//!
//! - **Views**: each entity type declares a default key template and any number
//!   of named templates, each rendering an independent key for the same row
//! - **Negative caching**: confirmed-absent lookups store a short-lived sentinel
//! - **Stampede lock**: cache-miss fallbacks for one key are serialized, best effort
//!
//! ## Configuration
//!
//! Entity types are configured in `modelcache.toml`:
//!
//! ```toml
//! [entities.user]
//! connection = "default"
//! key = "user:{id}"
//! views = { by_email = "user:email:{email}" }
//! except = ["password"]
//! expire_seconds = 3600
//! ```

mod config;
mod entity;
mod error;
mod keys;
mod lock;
mod store;

pub use self::config::{DEFAULT_NEGATIVE_TTL, DEFAULT_NEGATIVE_VALUE, EntityCacheConfig};
pub use entity::{EntityCache, FindOptions};
pub use error::CacheError;
pub use keys::{CacheKeyResolver, KeyTemplate, TemplateError};
pub use lock::{
    DEFAULT_LOCK_LEASE, DEFAULT_LOCK_MAX_WAIT, DEFAULT_LOCK_POLL_INTERVAL, DEFAULT_LOCK_PREFIX,
    LockConfig, StampedeLock,
};
pub use store::{KeyValueStore, MemoryStore, RawHash, StoreConnections, StoreError, TypeTag};
