//! Per-entity cache configuration.
//!
//! Built once when an entity type is defined and passed to `EntityCache`.

use std::collections::BTreeMap;
use std::time::Duration;

use super::keys::{CacheKeyResolver, KeyTemplate, TemplateError};
use super::lock::LockConfig;

pub const DEFAULT_NEGATIVE_VALUE: &str = "data invalid";
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCacheConfig {
    /// Entity type name used in logs and metric labels.
    pub entity: String,
    /// Key-value connection name; `None` disables caching.
    pub connection: Option<String>,
    /// Default view template; `None` disables caching.
    pub key: Option<KeyTemplate>,
    /// Additional named views over the same entity.
    pub views: BTreeMap<String, KeyTemplate>,
    /// Fields never written to any view.
    pub except: Vec<String>,
    /// Expiry applied after each successful view write.
    pub expire: Option<Duration>,
    /// Sentinel recording a confirmed-absent lookup.
    pub negative_value: String,
    pub negative_ttl: Duration,
    pub lock: LockConfig,
}

impl EntityCacheConfig {
    /// Caching disabled until a connection and default key are set.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            connection: None,
            key: None,
            views: BTreeMap::new(),
            except: Vec::new(),
            expire: None,
            negative_value: DEFAULT_NEGATIVE_VALUE.to_string(),
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            lock: LockConfig::default(),
        }
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        let connection = connection.into();
        self.connection = (!connection.trim().is_empty()).then_some(connection);
        self
    }

    pub fn with_key(mut self, template: &str) -> Result<Self, TemplateError> {
        self.key = Some(KeyTemplate::parse(template)?);
        Ok(self)
    }

    pub fn with_view(mut self, name: impl Into<String>, template: &str) -> Result<Self, TemplateError> {
        self.views.insert(name.into(), KeyTemplate::parse(template)?);
        Ok(self)
    }

    pub fn with_except<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(fields.into_iter().map(Into::into));
        self
    }

    /// A zero duration means no expiry.
    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = (!expire.is_zero()).then_some(expire);
        self
    }

    pub fn with_negative_value(mut self, value: impl Into<String>) -> Self {
        self.negative_value = value.into();
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Returns true if both a connection and a default key are configured.
    pub fn is_enabled(&self) -> bool {
        self.connection.is_some() && self.key.is_some()
    }

    pub fn is_excluded(&self, field: &str) -> bool {
        self.except.iter().any(|name| name == field)
    }

    pub(crate) fn resolver(&self) -> CacheKeyResolver {
        match (&self.connection, &self.key) {
            (Some(_), Some(primary)) => CacheKeyResolver::new(primary.clone(), self.views.clone()),
            _ => CacheKeyResolver::disabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::fields;

    #[test]
    fn default_values() {
        let config = EntityCacheConfig::new("user");
        assert!(!config.is_enabled());
        assert_eq!(config.negative_value, "data invalid");
        assert_eq!(config.negative_ttl, Duration::from_secs(300));
        assert_eq!(config.lock.prefix, "setcachelock:");
        assert_eq!(config.lock.max_wait, Duration::from_secs(5));
        assert_eq!(config.lock.poll_interval, Duration::from_millis(200));
        assert_eq!(config.expire, None);
    }

    #[test]
    fn needs_connection_and_key() {
        let keyed = EntityCacheConfig::new("user")
            .with_key("user:{id}")
            .expect("template");
        assert!(!keyed.is_enabled());
        assert!(!keyed.resolver().is_enabled());

        let connected = keyed.with_connection("default");
        assert!(connected.is_enabled());
        assert_eq!(
            connected.resolver().resolve(None, &fields([("id", 7)])).as_deref(),
            Some("user:7")
        );
    }

    #[test]
    fn blank_connection_disables() {
        let config = EntityCacheConfig::new("user").with_connection("  ");
        assert_eq!(config.connection, None);
    }

    #[test]
    fn zero_expire_means_none() {
        let config = EntityCacheConfig::new("user").with_expire(Duration::ZERO);
        assert_eq!(config.expire, None);
        let config = config.with_expire(Duration::from_secs(60));
        assert_eq!(config.expire, Some(Duration::from_secs(60)));
    }

    #[test]
    fn exclusion_lookup() {
        let config = EntityCacheConfig::new("user").with_except(["password"]);
        assert!(config.is_excluded("password"));
        assert!(!config.is_excluded("name"));
    }
}
