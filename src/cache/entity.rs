//! Entity cache: read-through lookups, write-through view population,
//! invalidation and negative caching over a hash-oriented key-value store.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::repos::EntityStore;
use crate::domain::entities::{Entity, Identity};
use crate::domain::types::{FieldMap, Scalar};

use super::config::EntityCacheConfig;
use super::error::CacheError;
use super::keys::CacheKeyResolver;
use super::lock::StampedeLock;
use super::store::{KeyValueStore, RawHash, StoreConnections, StoreError, TypeTag};

const METRIC_FIND_HIT_TOTAL: &str = "modelcache_find_hit_total";
const METRIC_FIND_MISS_TOTAL: &str = "modelcache_find_miss_total";
const METRIC_FIND_NEGATIVE_TOTAL: &str = "modelcache_find_negative_total";
const METRIC_FIND_CORRUPT_TOTAL: &str = "modelcache_find_corrupt_total";

/// Per-call lookup switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Query the entity store directly; nothing is read from or written to the cache.
    pub disable_cache: bool,
}

/// State of a cache key as observed by the read path.
#[derive(Debug)]
enum Probe {
    Hit(FieldMap),
    Negative,
    Miss,
    /// Non-hash value that is not the negative sentinel.
    Corrupt,
    /// A hash whose fields are not scalar encodings; the prior state is unknown.
    Undecodable,
}

/// Outcome of writing one view during `update_cache`.
#[derive(Debug, PartialEq, Eq)]
enum ViewWrite {
    Written,
    SkippedAbsent,
    Purged,
    Empty,
}

struct Backend {
    kv: Arc<dyn KeyValueStore>,
    lock: StampedeLock,
}

/// Cache-aside wrapper around single-entity lookups for one entity type.
pub struct EntityCache {
    config: EntityCacheConfig,
    resolver: CacheKeyResolver,
    backend: Option<Backend>,
    store: Arc<dyn EntityStore>,
}

impl EntityCache {
    /// `kv` may be `None`; lookups then always go to `store`.
    pub fn new(
        config: EntityCacheConfig,
        kv: Option<Arc<dyn KeyValueStore>>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        let resolver = config.resolver();
        let backend = kv.filter(|_| resolver.is_enabled()).map(|kv| Backend {
            lock: StampedeLock::new(kv.clone(), config.lock.clone(), config.entity.clone()),
            kv,
        });
        Self {
            config,
            resolver,
            backend,
            store,
        }
    }

    /// Resolve the configured connection name against `connections`.
    pub fn from_connections(
        config: EntityCacheConfig,
        connections: &StoreConnections,
        store: Arc<dyn EntityStore>,
    ) -> Result<Self, CacheError> {
        let kv = match config.connection.as_deref() {
            None => None,
            Some(name) => Some(
                connections
                    .get(name)
                    .ok_or_else(|| CacheError::unknown_connection(&config.entity, name))?,
            ),
        };
        Ok(Self::new(config, kv, store))
    }

    pub fn config(&self) -> &EntityCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Key of `view` for `entity`, or `None` when that view cannot be cached.
    pub fn cache_key(&self, entity: &Entity, view: Option<&str>) -> Option<String> {
        self.backend.as_ref()?;
        self.resolver.resolve(view, entity.fields())
    }

    /// Look up through the default view.
    pub async fn find(&self, identity: impl Into<Identity>) -> Result<Option<Entity>, CacheError> {
        self.find_with(identity, None, FindOptions::default()).await
    }

    /// Look up through a named view.
    pub async fn find_in_view(
        &self,
        identity: impl Into<Identity>,
        view: &str,
    ) -> Result<Option<Entity>, CacheError> {
        self.find_with(identity, Some(view), FindOptions::default())
            .await
    }

    #[instrument(
        skip(self, identity, view),
        fields(entity = %self.config.entity, view = view.unwrap_or("default"))
    )]
    pub async fn find_with(
        &self,
        identity: impl Into<Identity>,
        view: Option<&str>,
        options: FindOptions,
    ) -> Result<Option<Entity>, CacheError> {
        let identity = identity.into();

        let Some(backend) = self.backend.as_ref() else {
            return Ok(match identity {
                Identity::PrimaryKey(value) => self.store.find_by_primary_key(&value).await?,
                Identity::Fields(conditions) => self.store.find_by_fields(&conditions).await?,
            });
        };

        let conditions = identity.into_fields(self.store.primary_key());
        let key = match self.resolver.resolve(view, &conditions) {
            Some(key) if !options.disable_cache => key,
            _ => return Ok(self.store.find_by_fields(&conditions).await?),
        };

        let disable_cache = match self.probe(backend.kv.as_ref(), &key).await? {
            Probe::Hit(fields) => {
                counter!(METRIC_FIND_HIT_TOTAL, "entity" => self.config.entity.clone())
                    .increment(1);
                debug!(key = %key, "Cache hit");
                return Ok(Some(Entity::from_fields(fields).with_conditions(conditions)));
            }
            Probe::Negative => {
                counter!(METRIC_FIND_NEGATIVE_TOTAL, "entity" => self.config.entity.clone())
                    .increment(1);
                debug!(key = %key, "Negative cache hit");
                return Ok(None);
            }
            Probe::Miss => {
                counter!(METRIC_FIND_MISS_TOTAL, "entity" => self.config.entity.clone())
                    .increment(1);
                debug!(key = %key, "Cache miss");
                false
            }
            Probe::Corrupt => {
                counter!(METRIC_FIND_CORRUPT_TOTAL, "entity" => self.config.entity.clone())
                    .increment(1);
                warn!(key = %key, "Cache key holds an unexpected value; treating as miss");
                false
            }
            Probe::Undecodable => {
                counter!(METRIC_FIND_CORRUPT_TOTAL, "entity" => self.config.entity.clone())
                    .increment(1);
                warn!(key = %key, "Cache hash does not decode; bypassing cache for this lookup");
                true
            }
        };

        if disable_cache {
            return Ok(self.store.find_by_fields(&conditions).await?);
        }
        self.load(backend, &key, &conditions).await
    }

    async fn probe(&self, kv: &dyn KeyValueStore, key: &str) -> Result<Probe, StoreError> {
        if !kv.exists(key).await? {
            return Ok(Probe::Miss);
        }
        match kv.type_of(key).await? {
            TypeTag::Hash => {
                let raw = kv.read_hash(key).await?;
                if raw.is_empty() {
                    return Ok(Probe::Miss);
                }
                Ok(decode_hash(&raw).map_or(Probe::Undecodable, Probe::Hit))
            }
            TypeTag::String => match kv.get_scalar(key).await? {
                Some(value) if value == self.config.negative_value => Ok(Probe::Negative),
                Some(_) => Ok(Probe::Corrupt),
                None => Ok(Probe::Miss),
            },
            // Expired between the two calls.
            TypeTag::None => Ok(Probe::Miss),
            _ => Ok(Probe::Corrupt),
        }
    }

    /// Miss path: query the store under the stampede lock and write back.
    async fn load(
        &self,
        backend: &Backend,
        key: &str,
        conditions: &FieldMap,
    ) -> Result<Option<Entity>, CacheError> {
        backend
            .lock
            .with_lock(key, self.fill(backend.kv.as_ref(), key, conditions))
            .await
    }

    async fn fill(
        &self,
        kv: &dyn KeyValueStore,
        key: &str,
        conditions: &FieldMap,
    ) -> Result<Option<Entity>, CacheError> {
        match self.store.find_by_fields(conditions).await? {
            None => {
                kv.set_scalar_with_expiry(key, self.config.negative_ttl, &self.config.negative_value)
                    .await?;
                debug!(key = %key, "Entity absent; negative marker written");
                Ok(None)
            }
            Some(entity) => {
                self.update_cache(&entity, &FieldMap::new()).await;
                Ok(Some(entity.with_conditions(conditions.clone())))
            }
        }
    }

    /// Write `entity` into every declared view.
    ///
    /// An empty `partial` writes all current fields; otherwise only the given
    /// fields are merged, and only into views that already exist. Per-view
    /// failures are logged and do not change the result, and an entity holding
    /// a non-finite float is not written at all. Returns `false` only when
    /// caching is disabled for the entity type.
    pub async fn update_cache(&self, entity: &Entity, partial: &FieldMap) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        let is_partial = !partial.is_empty();
        let source = if is_partial { partial } else { entity.fields() };
        let Some(encoded) = source
            .iter()
            .filter(|(name, _)| !self.config.is_excluded(name))
            .map(|(name, value)| value.encode().map(|raw| (name.clone(), raw)))
            .collect::<Option<RawHash>>()
        else {
            warn!(entity = %self.config.entity, "Entity holds a non-finite float; not cached");
            return true;
        };

        for view in self.resolver.views() {
            let Some(key) = self.resolver.resolve(view, entity.fields()) else {
                continue;
            };
            match self
                .write_view(backend.kv.as_ref(), &key, &encoded, is_partial)
                .await
            {
                Ok(ViewWrite::Purged) => {
                    warn!(entity = %self.config.entity, key = %key, "Purged non-hash value from cache key");
                }
                Ok(outcome) => {
                    debug!(entity = %self.config.entity, key = %key, ?outcome, "Cache view processed");
                }
                Err(err) => {
                    warn!(entity = %self.config.entity, key = %key, error = %err, "Cache view write failed");
                }
            }
        }
        true
    }

    async fn write_view(
        &self,
        kv: &dyn KeyValueStore,
        key: &str,
        encoded: &RawHash,
        is_partial: bool,
    ) -> Result<ViewWrite, StoreError> {
        match kv.type_of(key).await? {
            TypeTag::None if is_partial => return Ok(ViewWrite::SkippedAbsent),
            TypeTag::None | TypeTag::Hash => {}
            _ => {
                kv.delete(key).await?;
                return Ok(ViewWrite::Purged);
            }
        }

        if !kv.write_hash_merge(key, encoded).await? {
            return Ok(ViewWrite::Empty);
        }
        if let Some(expire) = self.config.expire {
            kv.expire(key, expire).await?;
        }
        Ok(ViewWrite::Written)
    }

    /// Remove every declared view of `entity`, whatever it currently holds.
    pub async fn delete_cache(&self, entity: &Entity) -> Result<bool, CacheError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(false);
        };
        for view in self.resolver.views() {
            let Some(key) = self.resolver.resolve(view, entity.fields()) else {
                continue;
            };
            if backend.kv.exists(&key).await? {
                backend.kv.delete(&key).await?;
                debug!(entity = %self.config.entity, key = %key, "Cache view deleted");
            }
        }
        Ok(true)
    }

    /// Re-populate the views after a persistence write.
    ///
    /// Returns `false` without touching the cache when the write did not succeed.
    pub async fn refresh_after_save(&self, entity: &Entity, saved: bool) -> bool {
        if !saved {
            return false;
        }
        self.update_cache(entity, &FieldMap::new()).await;
        true
    }
}

fn decode_hash(raw: &RawHash) -> Option<FieldMap> {
    raw.iter()
        .map(|(name, value)| Scalar::decode(value).ok().map(|scalar| (name.clone(), scalar)))
        .collect()
}
