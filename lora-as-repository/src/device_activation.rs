use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    DeviceActivation, DeviceActivationActiveModel, DeviceActivationColumn, DeviceActivationModel,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};

/// Repository for device activations
pub struct DeviceActivationRepository;

impl DeviceActivationRepository {
    pub async fn create<C>(
        activation: DeviceActivationActiveModel,
        db: &C,
    ) -> StorageResult<DeviceActivationModel>
    where
        C: ConnectionTrait,
    {
        Ok(activation.insert(db).await?)
    }

    /// The most recent activation, which supersedes every older one.
    pub async fn find_latest<C>(
        dev_eui: &[u8],
        db: &C,
    ) -> StorageResult<Option<DeviceActivationModel>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceActivation::find()
            .filter(DeviceActivationColumn::DevEui.eq(dev_eui.to_vec()))
            .order_by_desc(DeviceActivationColumn::CreatedAt)
            .order_by_desc(DeviceActivationColumn::Id)
            .one(db)
            .await?)
    }

    pub async fn count_for_device<C>(dev_eui: &[u8], db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceActivation::find()
            .filter(DeviceActivationColumn::DevEui.eq(dev_eui.to_vec()))
            .count(db)
            .await?)
    }
}
