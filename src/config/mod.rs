//! Configuration layer: typed settings with layered precedence (file → env).

use std::{collections::BTreeMap, num::NonZeroU32, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{EntityCacheConfig, KeyTemplate, LockConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "modelcache";
const ENV_PREFIX: &str = "MODELCACHE";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    /// Cache configuration per entity type, keyed by entity name.
    pub entities: BTreeMap<String, EntityCacheConfig>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (default file → local file →
/// explicit file → `MODELCACHE__*` environment).
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

/// Parse settings from an inline TOML document, without file or environment layers.
pub fn from_toml(source: &str) -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(source, FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    entities: BTreeMap<String, RawEntitySettings>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            entities,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let entities = entities
            .into_iter()
            .map(|(name, raw)| build_entity_config(&name, raw).map(|config| (name, config)))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            logging,
            database,
            entities,
        })
    }

    pub fn entity(&self, name: &str) -> Option<&EntityCacheConfig> {
        self.entities.get(name)
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_entity_config(name: &str, raw: RawEntitySettings) -> Result<EntityCacheConfig, LoadError> {
    let field = |suffix: &str| format!("entities.{name}.{suffix}");
    let template = |suffix: String, source: &str| {
        KeyTemplate::parse(source).map_err(|err| LoadError::invalid(suffix, err.to_string()))
    };

    let mut config = EntityCacheConfig::new(name)
        .with_except(raw.except)
        .with_expire(Duration::from_secs(raw.expire_seconds.unwrap_or(0)));

    if let Some(connection) = raw.connection {
        config = config.with_connection(connection);
    }
    if let Some(key) = raw.key.as_deref() {
        config.key = Some(template(field("key"), key)?);
    }
    for (view, source) in &raw.views {
        let parsed = template(field(&format!("views.{view}")), source)?;
        config.views.insert(view.clone(), parsed);
    }

    if let Some(value) = raw.negative_value {
        if value.is_empty() {
            return Err(LoadError::invalid(
                field("negative_value"),
                "must not be empty",
            ));
        }
        config = config.with_negative_value(value);
    }
    if let Some(seconds) = raw.negative_ttl_seconds {
        config.negative_ttl = non_zero_secs(seconds, field("negative_ttl_seconds"))?;
    }

    let defaults = LockConfig::default();
    let lock = LockConfig {
        prefix: raw.lock_prefix.unwrap_or(defaults.prefix),
        max_wait: raw
            .lock_wait_seconds
            .map_or(defaults.max_wait, Duration::from_secs),
        poll_interval: match raw.lock_poll_millis {
            Some(0) => {
                return Err(LoadError::invalid(
                    field("lock_poll_millis"),
                    "must be greater than zero",
                ));
            }
            Some(millis) => Duration::from_millis(millis),
            None => defaults.poll_interval,
        },
        lease: match raw.lock_lease_seconds {
            Some(seconds) => non_zero_secs(seconds, field("lock_lease_seconds"))?,
            None => defaults.lease,
        },
    };
    if lock.prefix.is_empty() {
        return Err(LoadError::invalid(field("lock_prefix"), "must not be empty"));
    }

    Ok(config.with_lock(lock))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEntitySettings {
    connection: Option<String>,
    key: Option<String>,
    views: BTreeMap<String, String>,
    except: Vec<String>,
    expire_seconds: Option<u64>,
    negative_value: Option<String>,
    negative_ttl_seconds: Option<u64>,
    lock_prefix: Option<String>,
    lock_wait_seconds: Option<u64>,
    lock_poll_millis: Option<u64>,
    lock_lease_seconds: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_secs(seconds: u64, key: String) -> Result<Duration, LoadError> {
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests;
