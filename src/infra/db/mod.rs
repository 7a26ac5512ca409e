//! Postgres-backed entity store.

mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::repos::{EntityStore, RepoError};
use crate::config::DatabaseSettings;
use crate::domain::entities::Entity;
use crate::domain::types::{FieldMap, Scalar};
use crate::infra::error::InfraError;

/// Single-table lookups returning rows as field maps.
///
/// Rows are selected as `to_jsonb(t)`, so every column type decodes into a
/// [`Scalar`]; timestamps and other non-scalar types arrive as their JSON text.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
    table: String,
    primary_key: String,
}

impl PostgresEntityStore {
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Result<Self, RepoError> {
        let table = table.into();
        let primary_key = primary_key.into();
        quote_qualified(&table)?;
        quote_ident(&primary_key)?;
        Ok(Self {
            pool: Arc::new(pool),
            table,
            primary_key,
        })
    }

    /// Build a store over a lazily connected pool from `[database]` settings.
    pub fn from_settings(
        settings: &DatabaseSettings,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Result<Self, InfraError> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| InfraError::configuration("`database.url` is not set"))?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .connect_lazy(url)?;
        Self::new(pool, table, primary_key)
            .map_err(|err| InfraError::configuration(err.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn lookup_query(&self, conditions: &FieldMap) -> Result<QueryBuilder<'static, Postgres>, RepoError> {
        if conditions.is_empty() {
            return Err(RepoError::invalid_input("lookup requires at least one condition"));
        }

        let mut qb = QueryBuilder::new("SELECT to_jsonb(t) FROM ");
        qb.push(quote_qualified(&self.table)?);
        qb.push(" AS t WHERE ");

        let mut first = true;
        for (column, value) in conditions {
            if !first {
                qb.push(" AND ");
            }
            first = false;
            qb.push("t.");
            qb.push(quote_ident(column)?);
            match value {
                Scalar::Null => {
                    qb.push(" IS NULL");
                }
                Scalar::Bool(value) => {
                    qb.push(" = ");
                    qb.push_bind(*value);
                }
                Scalar::Int(value) => {
                    qb.push(" = ");
                    qb.push_bind(*value);
                }
                Scalar::Float(value) => {
                    qb.push(" = ");
                    qb.push_bind(*value);
                }
                Scalar::Text(value) => {
                    qb.push(" = ");
                    qb.push_bind(value.clone());
                }
            }
        }
        qb.push(" LIMIT 1");
        Ok(qb)
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    async fn find_by_primary_key(&self, value: &Scalar) -> Result<Option<Entity>, RepoError> {
        let mut conditions = FieldMap::new();
        conditions.insert(self.primary_key.clone(), value.clone());
        self.find_by_fields(&conditions).await
    }

    async fn find_by_fields(&self, conditions: &FieldMap) -> Result<Option<Entity>, RepoError> {
        let mut qb = self.lookup_query(conditions)?;
        let row: Option<JsonValue> = qb
            .build_query_scalar::<JsonValue>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        match row {
            None => Ok(None),
            Some(JsonValue::Object(columns)) => Ok(Some(Entity::from_fields(
                columns
                    .into_iter()
                    .map(|(name, value)| (name, scalar_from_json(value)))
                    .collect(),
            ))),
            Some(other) => Err(RepoError::from_persistence(format!(
                "expected a JSON object row, got `{other}`"
            ))),
        }
    }
}

fn scalar_from_json(value: JsonValue) -> Scalar {
    match value {
        JsonValue::Null => Scalar::Null,
        JsonValue::Bool(value) => Scalar::Bool(value),
        JsonValue::Number(number) => number
            .as_i64()
            .map(Scalar::Int)
            .or_else(|| number.as_f64().map(Scalar::Float))
            .unwrap_or_else(|| Scalar::Text(number.to_string())),
        JsonValue::String(value) => Scalar::Text(value),
        other => Scalar::Text(other.to_string()),
    }
}

fn quote_ident(name: &str) -> Result<String, RepoError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(RepoError::invalid_input(format!(
            "`{name}` is not a valid SQL identifier"
        )));
    }
    Ok(format!("\"{name}\""))
}

fn quote_qualified(name: &str) -> Result<String, RepoError> {
    let parts = name
        .split('.')
        .map(quote_ident)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join("."))
}
