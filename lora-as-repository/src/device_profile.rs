use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    DeviceProfile, DeviceProfileActiveModel, DeviceProfileModel,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait};
use uuid::Uuid;

/// Repository for device-profiles
pub struct DeviceProfileRepository;

impl DeviceProfileRepository {
    pub async fn create<C>(
        profile: DeviceProfileActiveModel,
        db: &C,
    ) -> StorageResult<DeviceProfileModel>
    where
        C: ConnectionTrait,
    {
        Ok(profile.insert(db).await?)
    }

    pub async fn find_by_id<C>(id: Uuid, db: &C) -> StorageResult<Option<DeviceProfileModel>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceProfile::find_by_id(id).one(db).await?)
    }
}
