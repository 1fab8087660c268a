pub mod init;
pub mod storage;
pub mod web;

use anyhow::Error as AnyhowError;
use config::ConfigError;
use init::InitContextError;
use lora_as_lorawan::LoRaWANError;
use sea_orm::{DbErr, TransactionError};
use serde_json::Error as SerdeJsonError;
use std::{io::Error as IoError, num::TryFromIntError};
use storage::StorageError;
use thiserror::Error;
use tokio::{task::JoinError, time::Duration};
use web::WebError;

pub type ASResult<T, E = ASError> = anyhow::Result<T, E>;
pub type WebResult<T, E = WebError> = anyhow::Result<T, E>;
pub type StorageResult<T, E = StorageError> = Result<T, E>;

#[derive(Error, Debug, Default)]
pub enum ASError {
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("read/write timeout")]
    Timeout(Duration),
    /// Input rejected before any state was touched.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("object does not exist: {0}")]
    NotFound(String),
    /// MIC or credential check failed.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A lock is held elsewhere or a uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The network server or a sink could not be reached; the caller may retry.
    #[error("remote unavailable: {0}")]
    TransientRemote(String),
    /// Broken internal invariant.
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    TryFromIntError(#[from] TryFromIntError),
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("{0}")]
    LoRaWAN(#[from] LoRaWANError),
    #[error("{0}")]
    InitContextError(#[from] InitContextError),
    #[error("{0}")]
    WebError(#[from] WebError),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Integration error: {0}")]
    Integration(String),
}

impl ASError {
    /// Whether the failure is worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ASError::TransientRemote(_) | ASError::Timeout(_) | ASError::ServiceUnavailable
        )
    }
}

impl From<String> for ASError {
    #[inline]
    fn from(e: String) -> Self {
        ASError::Msg(e)
    }
}

impl From<&str> for ASError {
    #[inline]
    fn from(e: &str) -> Self {
        ASError::Msg(e.to_string())
    }
}

impl From<DbErr> for ASError {
    #[inline]
    fn from(e: DbErr) -> Self {
        ASError::StorageError(StorageError::DBError(e))
    }
}

impl From<TransactionError<ASError>> for ASError {
    #[inline]
    fn from(e: TransactionError<ASError>) -> Self {
        match e {
            TransactionError::Connection(e) => e.into(),
            TransactionError::Transaction(e) => e,
        }
    }
}

impl From<redis::RedisError> for ASError {
    #[inline]
    fn from(e: redis::RedisError) -> Self {
        ASError::StorageError(StorageError::Redis(e.to_string()))
    }
}
