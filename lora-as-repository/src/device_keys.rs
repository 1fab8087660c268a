use chrono::Utc;
use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    DeviceKeys, DeviceKeysActiveModel, DeviceKeysModel,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, QuerySelect, Set};

/// Repository for device root keys
pub struct DeviceKeysRepository;

impl DeviceKeysRepository {
    pub async fn create<C>(keys: DeviceKeysActiveModel, db: &C) -> StorageResult<DeviceKeysModel>
    where
        C: ConnectionTrait,
    {
        Ok(keys.insert(db).await?)
    }

    pub async fn find<C>(dev_eui: &[u8], db: &C) -> StorageResult<Option<DeviceKeysModel>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceKeys::find_by_id(dev_eui.to_vec()).one(db).await?)
    }

    /// Loads the keys holding a row lock until the surrounding transaction
    /// ends. Serializes concurrent joins of one device.
    pub async fn find_for_update<C>(
        dev_eui: &[u8],
        db: &C,
    ) -> StorageResult<Option<DeviceKeysModel>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceKeys::find_by_id(dev_eui.to_vec())
            .lock_exclusive()
            .one(db)
            .await?)
    }

    pub async fn set_join_nonce<C>(
        keys: DeviceKeysModel,
        join_nonce: i32,
        db: &C,
    ) -> StorageResult<DeviceKeysModel>
    where
        C: ConnectionTrait,
    {
        let mut am: DeviceKeysActiveModel = keys.into();
        am.join_nonce = Set(join_nonce);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }
}
