use thiserror::Error;

use crate::application::repos::RepoError;

use super::store::StoreError;

/// Failures surfaced to callers of the entity cache.
///
/// Missing configuration, corrupt entries and absent rows are not errors: they
/// degrade to a store query or a `None` result.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("entity `{entity}` references unknown cache connection `{connection}`")]
    UnknownConnection { entity: String, connection: String },
}

impl CacheError {
    pub fn unknown_connection(entity: impl Into<String>, connection: impl Into<String>) -> Self {
        Self::UnknownConnection {
            entity: entity.into(),
            connection: connection.into(),
        }
    }
}
