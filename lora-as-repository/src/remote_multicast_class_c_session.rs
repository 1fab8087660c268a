use chrono::{DateTime, Duration, Utc};
use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    RemoteMulticastClassCSession, RemoteMulticastClassCSessionActiveModel,
    RemoteMulticastClassCSessionColumn, RemoteMulticastClassCSessionModel,
};
use sea_orm::{
    sea_query::{LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for multicast class-B/C session requests
pub struct RemoteMulticastClassCSessionRepository;

impl RemoteMulticastClassCSessionRepository {
    pub async fn create<C>(
        row: RemoteMulticastClassCSessionActiveModel,
        db: &C,
    ) -> StorageResult<RemoteMulticastClassCSessionModel>
    where
        C: ConnectionTrait,
    {
        Ok(row.insert(db).await?)
    }

    pub async fn find<C>(
        dev_eui: &[u8],
        multicast_group_id: Uuid,
        db: &C,
    ) -> StorageResult<Option<RemoteMulticastClassCSessionModel>>
    where
        C: ConnectionTrait,
    {
        Ok(
            RemoteMulticastClassCSession::find_by_id((dev_eui.to_vec(), multicast_group_id))
                .one(db)
                .await?,
        )
    }

    pub async fn find_pending<C>(
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &C,
    ) -> StorageResult<Vec<RemoteMulticastClassCSessionModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteMulticastClassCSession::find()
            .filter(RemoteMulticastClassCSessionColumn::StateProvisioned.eq(false))
            .filter(RemoteMulticastClassCSessionColumn::RetryCount.lt(max_retries))
            .filter(RemoteMulticastClassCSessionColumn::RetryAfter.lte(now))
            .order_by_asc(RemoteMulticastClassCSessionColumn::RetryAfter)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(db)
            .await?)
    }

    pub async fn schedule_retry<C>(
        row: RemoteMulticastClassCSessionModel,
        now: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<RemoteMulticastClassCSessionModel>
    where
        C: ConnectionTrait,
    {
        let retry_count = row.retry_count + 1;
        let retry_after = now + Duration::seconds(row.retry_interval_secs);
        let mut am: RemoteMulticastClassCSessionActiveModel = row.into();
        am.retry_count = Set(retry_count);
        am.retry_after = Set(retry_after);
        am.updated_at = Set(now);
        Ok(am.update(db).await?)
    }

    pub async fn find_by_slot<C>(
        dev_eui: &[u8],
        mc_group_id: i16,
        db: &C,
    ) -> StorageResult<Option<RemoteMulticastClassCSessionModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteMulticastClassCSession::find()
            .filter(RemoteMulticastClassCSessionColumn::DevEui.eq(dev_eui.to_vec()))
            .filter(RemoteMulticastClassCSessionColumn::McGroupId.eq(mc_group_id))
            .order_by_desc(RemoteMulticastClassCSessionColumn::UpdatedAt)
            .lock_exclusive()
            .one(db)
            .await?)
    }

    pub async fn set_provisioned<C>(
        row: RemoteMulticastClassCSessionModel,
        db: &C,
    ) -> StorageResult<RemoteMulticastClassCSessionModel>
    where
        C: ConnectionTrait,
    {
        let mut am: RemoteMulticastClassCSessionActiveModel = row.into();
        am.state_provisioned = Set(true);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }

    pub async fn delete_for_multicast_group<C>(multicast_group_id: Uuid, db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let res = RemoteMulticastClassCSession::delete_many()
            .filter(RemoteMulticastClassCSessionColumn::MulticastGroupId.eq(multicast_group_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
