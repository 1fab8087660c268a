use thiserror::Error;

/// Classifies ephemeral-store errors to avoid ad-hoc strings.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Value type is incompatible with the requested operation (e.g. bytes for a hash increment)
    #[error("cache value type incompatible: {0}")]
    ValueType(String),
    /// Backend could not be reached or initialized
    #[error("cache initialization failure: {0}")]
    Initialization(String),
    #[error("cache error: {0}")]
    Msg(String),
}

#[derive(Error, Debug, Default)]
pub enum StorageError {
    #[error("database unavailable")]
    #[default]
    StorageUnavailable,

    #[error("database error: `{0}`")]
    DBError(#[from] sea_orm::DbErr),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("{0}")]
    CacheKind(#[from] CacheError),
}
