use chrono::{DateTime, Duration, Utc};
use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    RemoteMulticastSetup, RemoteMulticastSetupActiveModel, RemoteMulticastSetupColumn,
    RemoteMulticastSetupModel,
};
use sea_orm::{
    sea_query::{LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for `McGroupSetupReq` / `McGroupDeleteReq` rows
pub struct RemoteMulticastSetupRepository;

impl RemoteMulticastSetupRepository {
    pub async fn create<C>(
        row: RemoteMulticastSetupActiveModel,
        db: &C,
    ) -> StorageResult<RemoteMulticastSetupModel>
    where
        C: ConnectionTrait,
    {
        Ok(row.insert(db).await?)
    }

    pub async fn find<C>(
        dev_eui: &[u8],
        multicast_group_id: Uuid,
        db: &C,
    ) -> StorageResult<Option<RemoteMulticastSetupModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteMulticastSetup::find_by_id((dev_eui.to_vec(), multicast_group_id))
            .one(db)
            .await?)
    }

    /// Rows due for (re)transmission. Rows locked by another replica are
    /// skipped.
    pub async fn find_pending<C>(
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &C,
    ) -> StorageResult<Vec<RemoteMulticastSetupModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteMulticastSetup::find()
            .filter(RemoteMulticastSetupColumn::StateProvisioned.eq(false))
            .filter(RemoteMulticastSetupColumn::RetryCount.lt(max_retries))
            .filter(RemoteMulticastSetupColumn::RetryAfter.lte(now))
            .order_by_asc(RemoteMulticastSetupColumn::RetryAfter)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(db)
            .await?)
    }

    pub async fn schedule_retry<C>(
        row: RemoteMulticastSetupModel,
        now: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<RemoteMulticastSetupModel>
    where
        C: ConnectionTrait,
    {
        let retry_count = row.retry_count + 1;
        let retry_after = now + Duration::seconds(row.retry_interval_secs);
        let mut am: RemoteMulticastSetupActiveModel = row.into();
        am.retry_count = Set(retry_count);
        am.retry_after = Set(retry_after);
        am.updated_at = Set(now);
        Ok(am.update(db).await?)
    }

    /// Most recent row using the given device slot, locked for update.
    pub async fn find_by_slot<C>(
        dev_eui: &[u8],
        mc_group_id: i16,
        db: &C,
    ) -> StorageResult<Option<RemoteMulticastSetupModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteMulticastSetup::find()
            .filter(RemoteMulticastSetupColumn::DevEui.eq(dev_eui.to_vec()))
            .filter(RemoteMulticastSetupColumn::McGroupId.eq(mc_group_id))
            .order_by_desc(RemoteMulticastSetupColumn::UpdatedAt)
            .lock_exclusive()
            .one(db)
            .await?)
    }

    pub async fn set_provisioned<C>(
        row: RemoteMulticastSetupModel,
        db: &C,
    ) -> StorageResult<RemoteMulticastSetupModel>
    where
        C: ConnectionTrait,
    {
        let mut am: RemoteMulticastSetupActiveModel = row.into();
        am.state_provisioned = Set(true);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }

    pub async fn find_provisioned_dev_euis<C>(
        multicast_group_id: Uuid,
        db: &C,
    ) -> StorageResult<Vec<Vec<u8>>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteMulticastSetup::find()
            .select_only()
            .column(RemoteMulticastSetupColumn::DevEui)
            .filter(RemoteMulticastSetupColumn::MulticastGroupId.eq(multicast_group_id))
            .filter(RemoteMulticastSetupColumn::StateProvisioned.eq(true))
            .into_tuple::<Vec<u8>>()
            .all(db)
            .await?)
    }

    pub async fn delete_for_multicast_group<C>(multicast_group_id: Uuid, db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let res = RemoteMulticastSetup::delete_many()
            .filter(RemoteMulticastSetupColumn::MulticastGroupId.eq(multicast_group_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
