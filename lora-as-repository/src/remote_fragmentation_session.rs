use chrono::{DateTime, Duration, Utc};
use lora_as_error::{storage::StorageError, StorageResult};
use lora_as_models::entities::prelude::{
    RemoteFragmentationSession, RemoteFragmentationSessionActiveModel,
    RemoteFragmentationSessionColumn, RemoteFragmentationSessionModel,
};
use sea_orm::{
    sea_query::{LockBehavior, LockType, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for `FragSessionSetupReq` / `FragSessionDeleteReq` rows
pub struct RemoteFragmentationSessionRepository;

impl RemoteFragmentationSessionRepository {
    /// Inserts the session, replacing a previous one using the same index on
    /// the device.
    pub async fn upsert<C>(
        row: RemoteFragmentationSessionModel,
        db: &C,
    ) -> StorageResult<RemoteFragmentationSessionModel>
    where
        C: ConnectionTrait,
    {
        let key = (row.dev_eui.clone(), row.frag_index);
        RemoteFragmentationSession::insert(row.into_active_model().reset_all())
            .on_conflict(
                OnConflict::columns([
                    RemoteFragmentationSessionColumn::DevEui,
                    RemoteFragmentationSessionColumn::FragIndex,
                ])
                .update_columns([
                    RemoteFragmentationSessionColumn::FuotaDeploymentId,
                    RemoteFragmentationSessionColumn::McGroupIds,
                    RemoteFragmentationSessionColumn::NbFrag,
                    RemoteFragmentationSessionColumn::FragSize,
                    RemoteFragmentationSessionColumn::FragmentationMatrix,
                    RemoteFragmentationSessionColumn::BlockAckDelay,
                    RemoteFragmentationSessionColumn::Padding,
                    RemoteFragmentationSessionColumn::Descriptor,
                    RemoteFragmentationSessionColumn::State,
                    RemoteFragmentationSessionColumn::StateProvisioned,
                    RemoteFragmentationSessionColumn::RetryAfter,
                    RemoteFragmentationSessionColumn::RetryCount,
                    RemoteFragmentationSessionColumn::RetryIntervalSecs,
                    RemoteFragmentationSessionColumn::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(db)
            .await?;
        RemoteFragmentationSession::find_by_id(key.clone())
            .one(db)
            .await?
            .ok_or_else(|| {
                StorageError::EntityNotFound(format!(
                    "fragmentation session {}/{}",
                    hex::encode(&key.0),
                    key.1
                ))
            })
    }

    pub async fn find_pending<C>(
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &C,
    ) -> StorageResult<Vec<RemoteFragmentationSessionModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteFragmentationSession::find()
            .filter(RemoteFragmentationSessionColumn::StateProvisioned.eq(false))
            .filter(RemoteFragmentationSessionColumn::RetryCount.lt(max_retries))
            .filter(RemoteFragmentationSessionColumn::RetryAfter.lte(now))
            .order_by_asc(RemoteFragmentationSessionColumn::RetryAfter)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(db)
            .await?)
    }

    pub async fn schedule_retry<C>(
        row: RemoteFragmentationSessionModel,
        now: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<RemoteFragmentationSessionModel>
    where
        C: ConnectionTrait,
    {
        let retry_count = row.retry_count + 1;
        let retry_after = now + Duration::seconds(row.retry_interval_secs);
        let mut am: RemoteFragmentationSessionActiveModel = row.into();
        am.retry_count = Set(retry_count);
        am.retry_after = Set(retry_after);
        am.updated_at = Set(now);
        Ok(am.update(db).await?)
    }

    pub async fn find_for_update<C>(
        dev_eui: &[u8],
        frag_index: i16,
        db: &C,
    ) -> StorageResult<Option<RemoteFragmentationSessionModel>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteFragmentationSession::find_by_id((dev_eui.to_vec(), frag_index))
            .lock_exclusive()
            .one(db)
            .await?)
    }

    pub async fn set_provisioned<C>(
        row: RemoteFragmentationSessionModel,
        db: &C,
    ) -> StorageResult<RemoteFragmentationSessionModel>
    where
        C: ConnectionTrait,
    {
        let mut am: RemoteFragmentationSessionActiveModel = row.into();
        am.state_provisioned = Set(true);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }

    pub async fn find_provisioned_dev_euis<C>(
        fuota_deployment_id: Uuid,
        db: &C,
    ) -> StorageResult<Vec<Vec<u8>>>
    where
        C: ConnectionTrait,
    {
        Ok(RemoteFragmentationSession::find()
            .select_only()
            .column(RemoteFragmentationSessionColumn::DevEui)
            .filter(RemoteFragmentationSessionColumn::FuotaDeploymentId.eq(fuota_deployment_id))
            .filter(RemoteFragmentationSessionColumn::StateProvisioned.eq(true))
            .into_tuple::<Vec<u8>>()
            .all(db)
            .await?)
    }

    pub async fn delete_for_deployment<C>(fuota_deployment_id: Uuid, db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let res = RemoteFragmentationSession::delete_many()
            .filter(RemoteFragmentationSessionColumn::FuotaDeploymentId.eq(fuota_deployment_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
