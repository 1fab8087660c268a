use chrono::Utc;
use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    Device, DeviceColumn, DeviceMulticastGroup, DeviceMulticastGroupActiveModel,
    DeviceMulticastGroupColumn, MulticastGroup, MulticastGroupActiveModel, MulticastGroupColumn,
    MulticastGroupModel,
};
use sea_orm::{
    sea_query::Query, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for multicast groups and their membership
pub struct MulticastGroupRepository;

impl MulticastGroupRepository {
    pub async fn create<C>(
        group: MulticastGroupActiveModel,
        db: &C,
    ) -> StorageResult<MulticastGroupModel>
    where
        C: ConnectionTrait,
    {
        Ok(group.insert(db).await?)
    }

    pub async fn find_by_id<C>(id: Uuid, db: &C) -> StorageResult<Option<MulticastGroupModel>>
    where
        C: ConnectionTrait,
    {
        Ok(MulticastGroup::find_by_id(id).one(db).await?)
    }

    /// Loads the group holding a row lock, serializing frame-counter use.
    pub async fn find_for_update<C>(id: Uuid, db: &C) -> StorageResult<Option<MulticastGroupModel>>
    where
        C: ConnectionTrait,
    {
        Ok(MulticastGroup::find_by_id(id).lock_exclusive().one(db).await?)
    }

    pub async fn set_f_cnt<C>(
        group: MulticastGroupModel,
        f_cnt: i64,
        db: &C,
    ) -> StorageResult<MulticastGroupModel>
    where
        C: ConnectionTrait,
    {
        let mut am: MulticastGroupActiveModel = group.into();
        am.f_cnt = Set(f_cnt);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }

    /// Deletes the group, membership and remote command rows cascade.
    pub async fn delete<C>(id: Uuid, db: &C) -> StorageResult<()>
    where
        C: ConnectionTrait,
    {
        MulticastGroup::delete_by_id(id).exec(db).await?;
        Ok(())
    }

    /// Adds a member, a no-op when it already is one.
    pub async fn add_device<C>(id: Uuid, dev_eui: &[u8], db: &C) -> StorageResult<()>
    where
        C: ConnectionTrait,
    {
        let exists = DeviceMulticastGroup::find_by_id((dev_eui.to_vec(), id))
            .one(db)
            .await?
            .is_some();
        if !exists {
            DeviceMulticastGroupActiveModel {
                dev_eui: Set(dev_eui.to_vec()),
                multicast_group_id: Set(id),
                created_at: Set(Utc::now()),
            }
            .insert(db)
            .await?;
        }
        Ok(())
    }

    /// Removes a member, returns whether it was one.
    pub async fn remove_device<C>(id: Uuid, dev_eui: &[u8], db: &C) -> StorageResult<bool>
    where
        C: ConnectionTrait,
    {
        let res = DeviceMulticastGroup::delete_by_id((dev_eui.to_vec(), id))
            .exec(db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn count_devices<C>(id: Uuid, db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceMulticastGroup::find()
            .filter(DeviceMulticastGroupColumn::MulticastGroupId.eq(id))
            .count(db)
            .await?)
    }

    /// Members whose device belongs to another application than the group.
    pub async fn count_foreign_devices<C>(group: &MulticastGroupModel, db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        Ok(Device::find()
            .filter(DeviceColumn::ApplicationId.ne(group.application_id))
            .filter(
                DeviceColumn::DevEui.in_subquery(
                    Query::select()
                        .column(DeviceMulticastGroupColumn::DevEui)
                        .from(DeviceMulticastGroup)
                        .and_where(DeviceMulticastGroupColumn::MulticastGroupId.eq(group.id))
                        .to_owned(),
                ),
            )
            .count(db)
            .await?)
    }

    /// Every group id, used by the startup consistency check.
    pub async fn find_all_ids<C>(db: &C) -> StorageResult<Vec<Uuid>>
    where
        C: ConnectionTrait,
    {
        Ok(MulticastGroup::find()
            .select_only()
            .column(MulticastGroupColumn::Id)
            .into_tuple::<Uuid>()
            .all(db)
            .await?)
    }
}
