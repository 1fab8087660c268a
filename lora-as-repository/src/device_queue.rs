use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    DeviceQueue, DeviceQueueActiveModel, DeviceQueueColumn, DeviceQueueModel,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
};

/// Repository for the local copy of the device downlink queue
pub struct DeviceQueueRepository;

impl DeviceQueueRepository {
    pub async fn create<C>(item: DeviceQueueActiveModel, db: &C) -> StorageResult<DeviceQueueModel>
    where
        C: ConnectionTrait,
    {
        Ok(item.insert(db).await?)
    }

    pub async fn find_for_device<C>(dev_eui: &[u8], db: &C) -> StorageResult<Vec<DeviceQueueModel>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceQueue::find()
            .filter(DeviceQueueColumn::DevEui.eq(dev_eui.to_vec()))
            .order_by_asc(DeviceQueueColumn::FCnt)
            .all(db)
            .await?)
    }

    /// The item that was transmitted with `f_cnt`, if still queued locally.
    pub async fn find_by_f_cnt<C>(
        dev_eui: &[u8],
        f_cnt: i64,
        db: &C,
    ) -> StorageResult<Option<DeviceQueueModel>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceQueue::find()
            .filter(DeviceQueueColumn::DevEui.eq(dev_eui.to_vec()))
            .filter(DeviceQueueColumn::FCnt.eq(f_cnt))
            .one(db)
            .await?)
    }

    pub async fn delete<C>(id: i32, db: &C) -> StorageResult<()>
    where
        C: ConnectionTrait,
    {
        DeviceQueue::delete_by_id(id).exec(db).await?;
        Ok(())
    }

    /// Drops every local item of the device, returns the number removed.
    pub async fn flush_for_device<C>(dev_eui: &[u8], db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let res = DeviceQueue::delete_many()
            .filter(DeviceQueueColumn::DevEui.eq(dev_eui.to_vec()))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
