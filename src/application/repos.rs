//! Repository trait describing the relational persistence behind an entity type.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::Entity;
use crate::domain::types::{FieldMap, Scalar};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("entity store unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Read-only lookups used by the cache layer.
///
/// An absent row is `Ok(None)`, never an error.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// The column a bare identity value is matched against.
    fn primary_key(&self) -> &str;

    async fn find_by_primary_key(&self, value: &Scalar) -> Result<Option<Entity>, RepoError>;

    /// Match the first row where every given column equals its value.
    async fn find_by_fields(&self, conditions: &FieldMap) -> Result<Option<Entity>, RepoError>;
}
