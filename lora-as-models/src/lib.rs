pub mod constants;
pub mod entities;
pub mod enums;
pub mod settings;

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use lora_as_error::{init::InitContextError, storage::StorageError, ASResult};
use sea_orm::DatabaseConnection;
use settings::Settings;
use std::{collections::HashMap, sync::Arc, time::Duration};

impl_downcast!(sync DbManager);
impl_downcast!(sync EphemeralStore);
impl_downcast!(sync ApplicationServer);
impl_downcast!(sync WebServer);

/// Persistent store handle shared by every component.
#[async_trait]
pub trait DbManager: DowncastSync + Send + Sync + 'static {
    /// Connects the pool and, when enabled, applies pending migrations.
    async fn init(settings: &Settings) -> ASResult<Arc<Self>, InitContextError>
    where
        Self: Sized;

    /// Returns a handle on the pooled connection set.
    fn get_connection(&self) -> ASResult<DatabaseConnection, StorageError>;

    /// Gracefully closes all database connections.
    async fn close(&self) -> ASResult<()>;
}

/// Low-latency key/value and counter store with per-key TTLs.
///
/// Backs the MIC to ping-id lookups, downlink de-duplication locks and the
/// metrics buckets.
#[async_trait]
pub trait EphemeralStore: DowncastSync + Send + Sync + 'static {
    async fn init(settings: &Settings) -> ASResult<Arc<Self>, InitContextError>
    where
        Self: Sized;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ASResult<(), StorageError>;

    /// Stores `value` only when `key` is absent. Returns `true` when the
    /// caller acquired the key.
    async fn set_nx_ex(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> ASResult<bool, StorageError>;

    async fn get(&self, key: &str) -> ASResult<Option<Vec<u8>>, StorageError>;

    /// Removes `key`. Returns `true` when it existed.
    async fn del(&self, key: &str) -> ASResult<bool, StorageError>;

    /// Atomically increments every field of the hash at `key` and refreshes
    /// its TTL.
    async fn hincr_by_float(
        &self,
        key: &str,
        fields: &[(String, f64)],
        ttl: Duration,
    ) -> ASResult<(), StorageError>;

    /// All fields of the hash at `key`, empty when absent.
    async fn hgetall(&self, key: &str) -> ASResult<HashMap<String, f64>, StorageError>;

    async fn close(&self) -> ASResult<()>;
}

/// The application server: NS-facing handlers plus every background loop.
#[async_trait]
pub trait ApplicationServer: DowncastSync + Send + Sync + 'static {
    async fn init(
        settings: &Settings,
        db_manager: Arc<dyn DbManager>,
        store: Arc<dyn EphemeralStore>,
    ) -> ASResult<Arc<Self>, InitContextError>
    where
        Self: Sized;

    /// Spawns the reconcilers, the FUOTA scheduler, the gateway pinger and
    /// the integration downlink consumers.
    async fn start(&self) -> ASResult<()>;

    /// Cancels every background task and waits for them to finish.
    async fn stop(&self) -> ASResult<()>;
}

/// HTTP endpoint exposing the join-server.
#[async_trait]
pub trait WebServer: DowncastSync + Send + Sync + 'static {
    async fn init(
        settings: &Settings,
        server: Arc<dyn ApplicationServer>,
    ) -> ASResult<Arc<Self>, InitContextError>
    where
        Self: Sized;

    /// Gracefully stops the web server.
    async fn stop(&self) -> ASResult<()>;
}
