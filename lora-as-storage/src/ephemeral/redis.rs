use lora_as_error::storage::StorageError;
use lora_as_models::settings::Redis as RedisConfig;
use redis::{
    aio::{ConnectionLike, ConnectionManager},
    cluster::ClusterClient,
    cluster_async::ClusterConnection,
    Cmd, Pipeline, RedisError, RedisFuture, Value,
};
use std::{collections::HashMap, time::Duration};
use tracing::info;

/// Single-node or cluster connection, both reconnect on their own.
#[derive(Clone)]
pub enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            RedisConnection::Single(c) => c.req_packed_command(cmd),
            RedisConnection::Cluster(c) => c.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            RedisConnection::Single(c) => c.req_packed_commands(cmd, offset, count),
            RedisConnection::Cluster(c) => c.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            RedisConnection::Single(c) => c.get_db(),
            RedisConnection::Cluster(c) => c.get_db(),
        }
    }
}

#[inline]
fn redis_err(e: RedisError) -> StorageError {
    StorageError::Redis(e.to_string())
}

#[inline]
fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

pub struct RedisStore {
    conn: RedisConnection,
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        let conn = if config.cluster {
            let client = ClusterClient::new(config.servers.clone()).map_err(redis_err)?;
            RedisConnection::Cluster(client.get_async_connection().await.map_err(redis_err)?)
        } else {
            let url = config
                .servers
                .first()
                .ok_or_else(|| StorageError::Redis("no redis server configured".into()))?;
            let client = redis::Client::open(url.as_str()).map_err(redis_err)?;
            RedisConnection::Single(ConnectionManager::new(client).await.map_err(redis_err)?)
        };
        info!(cluster = config.cluster, servers = ?config.servers, "Connected to redis");
        Ok(Self { conn })
    }

    pub async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    pub async fn set_nx_ex(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(set.is_some())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)
    }

    pub async fn del(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let n: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(n > 0)
    }

    pub async fn hincr_by_float(
        &self,
        key: &str,
        fields: &[(String, f64)],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, delta) in fields {
            pipe.cmd("HINCRBYFLOAT").arg(key).arg(field).arg(*delta).ignore();
        }
        pipe.cmd("PEXPIRE").arg(key).arg(ttl_ms(ttl)).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(redis_err)?;
        Ok(())
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, f64>, StorageError> {
        let mut conn = self.conn.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)
    }
}
