mod ephemeral;
mod migration;
mod sql;

use async_trait::async_trait;
use ephemeral::{memory::MemoryStore, redis::RedisStore};
use lora_as_error::{init::InitContextError, storage::StorageError, ASResult};
use lora_as_models::{
    settings::{EphemeralBackend, Settings},
    DbManager, EphemeralStore,
};
use sea_orm::DatabaseConnection;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{info, instrument};

pub use migration::{Migrator, MigratorTrait};

/// Global database manager struct
pub struct ASDbManager {
    db_conn: Option<DatabaseConnection>,
}

impl ASDbManager {
    /// Wraps an existing connection, migrations are the caller's concern.
    pub fn from_connection(db: DatabaseConnection) -> Arc<Self> {
        Arc::new(Self { db_conn: Some(db) })
    }
}

#[async_trait]
impl DbManager for ASDbManager {
    #[inline]
    #[instrument(name = "init-db-manager", skip_all)]
    async fn init(settings: &Settings) -> ASResult<Arc<Self>, InitContextError> {
        let db = sql::init_db(&settings.postgresql)
            .await
            .map_err(|e| InitContextError::Primitive(format!("Failed to init database: {e}")))?;

        if settings.postgresql.automigrate {
            Migrator::up(&db, None).await.map_err(|e| {
                InitContextError::Primitive(format!("Failed to migrate database: {e}"))
            })?;
            info!("Database migrations applied");
        }

        info!("Database manager initialized successfully");
        Ok(Arc::new(ASDbManager { db_conn: Some(db) }))
    }

    #[inline]
    fn get_connection(&self) -> ASResult<DatabaseConnection, StorageError> {
        self.db_conn
            .as_ref()
            .ok_or(StorageError::StorageUnavailable)
            .cloned()
    }

    #[inline]
    #[instrument(name = "db_close", skip_all)]
    async fn close(&self) -> ASResult<()> {
        info!("🛑 Closing database connections...");
        if let Some(db) = &self.db_conn {
            db.clone().close().await?;
        }
        info!("✅ Database connections closed successfully");
        Ok(())
    }
}

enum Backend {
    Redis(RedisStore),
    Memory(MemoryStore),
}

/// Ephemeral store backed by redis (single node or cluster) or by an
/// in-process moka cache.
pub struct ASEphemeralStore {
    backend: Backend,
}

impl ASEphemeralStore {
    /// In-process store, used by single-replica deployments and tests.
    pub fn in_memory(max_capacity: u64) -> Arc<Self> {
        Arc::new(Self {
            backend: Backend::Memory(MemoryStore::new(max_capacity)),
        })
    }
}

#[async_trait]
impl EphemeralStore for ASEphemeralStore {
    #[instrument(name = "init-ephemeral-store", skip_all)]
    async fn init(settings: &Settings) -> ASResult<Arc<Self>, InitContextError> {
        let backend = match settings.redis.backend {
            EphemeralBackend::Redis => Backend::Redis(
                RedisStore::connect(&settings.redis)
                    .await
                    .map_err(|e| InitContextError::Primitive(format!("Failed to connect redis: {e}")))?,
            ),
            EphemeralBackend::Memory => {
                info!(capacity = settings.redis.memory_capacity, "Using in-process ephemeral store");
                Backend::Memory(MemoryStore::new(settings.redis.memory_capacity))
            }
        };
        Ok(Arc::new(Self { backend }))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ASResult<(), StorageError> {
        match &self.backend {
            Backend::Redis(s) => s.set_ex(key, value, ttl).await,
            Backend::Memory(s) => s.set_ex(key, value, ttl).await,
        }
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> ASResult<bool, StorageError> {
        match &self.backend {
            Backend::Redis(s) => s.set_nx_ex(key, value, ttl).await,
            Backend::Memory(s) => s.set_nx_ex(key, value, ttl).await,
        }
    }

    async fn get(&self, key: &str) -> ASResult<Option<Vec<u8>>, StorageError> {
        match &self.backend {
            Backend::Redis(s) => s.get(key).await,
            Backend::Memory(s) => s.get(key).await,
        }
    }

    async fn del(&self, key: &str) -> ASResult<bool, StorageError> {
        match &self.backend {
            Backend::Redis(s) => s.del(key).await,
            Backend::Memory(s) => s.del(key).await,
        }
    }

    async fn hincr_by_float(
        &self,
        key: &str,
        fields: &[(String, f64)],
        ttl: Duration,
    ) -> ASResult<(), StorageError> {
        match &self.backend {
            Backend::Redis(s) => s.hincr_by_float(key, fields, ttl).await,
            Backend::Memory(s) => s.hincr_by_float(key, fields, ttl).await,
        }
    }

    async fn hgetall(&self, key: &str) -> ASResult<HashMap<String, f64>, StorageError> {
        match &self.backend {
            Backend::Redis(s) => s.hgetall(key).await,
            Backend::Memory(s) => s.hgetall(key).await,
        }
    }

    async fn close(&self) -> ASResult<()> {
        // connections are dropped with the store
        info!("Ephemeral store closed");
        Ok(())
    }
}
