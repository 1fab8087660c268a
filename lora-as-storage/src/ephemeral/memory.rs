use lora_as_error::storage::{CacheError, StorageError};
use moka::{future::Cache, Expiry};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

#[derive(Clone, Debug)]
enum StoredValue {
    Bytes(Vec<u8>),
    Hash(HashMap<String, f64>),
}

/// The cached item with its own expiration.
#[derive(Clone, Debug)]
struct Item {
    value: StoredValue,
    ttl: Duration,
}

struct ItemExpiry;

impl Expiry<String, Item> for ItemExpiry {
    fn expire_after_create(&self, _key: &String, item: &Item, _: Instant) -> Option<Duration> {
        Some(item.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        item: &Item,
        _: Instant,
        _current: Option<Duration>,
    ) -> Option<Duration> {
        Some(item.ttl)
    }
}

/// In-process backend built on moka. Only suitable for a single replica
/// since locks and lookups are not shared.
pub struct MemoryStore {
    inner: Cache<String, Item>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(ItemExpiry)
                .build(),
        }
    }

    pub async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        self.inner
            .insert(
                key.to_string(),
                Item {
                    value: StoredValue::Bytes(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    pub async fn set_nx_ex(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(async move {
                Item {
                    value: StoredValue::Bytes(value),
                    ttl,
                }
            })
            .await;
        Ok(entry.is_fresh())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.inner.get(key).await {
            None => Ok(None),
            Some(Item {
                value: StoredValue::Bytes(b),
                ..
            }) => Ok(Some(b)),
            Some(_) => Err(CacheError::ValueType(format!("{key} holds a hash")).into()),
        }
    }

    pub async fn del(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.inner.remove(key).await.is_some())
    }

    pub async fn hincr_by_float(
        &self,
        key: &str,
        fields: &[(String, f64)],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.inner
            .entry(key.to_string())
            .and_upsert_with(|current| async move {
                let mut hash = match current.map(|e| e.into_value().value) {
                    Some(StoredValue::Hash(h)) => h,
                    _ => HashMap::new(),
                };
                for (field, delta) in fields {
                    *hash.entry(field.clone()).or_insert(0.0) += delta;
                }
                Item {
                    value: StoredValue::Hash(hash),
                    ttl,
                }
            })
            .await;
        Ok(())
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, f64>, StorageError> {
        match self.inner.get(key).await {
            None => Ok(HashMap::new()),
            Some(Item {
                value: StoredValue::Hash(h),
                ..
            }) => Ok(h),
            Some(_) => Err(CacheError::ValueType(format!("{key} holds bytes")).into()),
        }
    }
}
