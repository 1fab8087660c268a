use chrono::{DateTime, Utc};
use lora_as_error::StorageResult;
use lora_as_models::{
    entities::prelude::{
        FuotaDeployment, FuotaDeploymentActiveModel, FuotaDeploymentColumn,
        FuotaDeploymentDevice, FuotaDeploymentDeviceActiveModel,
        FuotaDeploymentDeviceColumn, FuotaDeploymentDeviceModel, FuotaDeploymentModel,
        RemoteFragmentationSession, RemoteFragmentationSessionColumn, RemoteMulticastSetup,
        RemoteMulticastSetupColumn,
    },
    enums::fuota::{FuotaDeviceState, FuotaState},
};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType, Query},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for FUOTA deployments
pub struct FuotaDeploymentRepository;

impl FuotaDeploymentRepository {
    pub async fn create<C>(
        deployment: FuotaDeploymentActiveModel,
        db: &C,
    ) -> StorageResult<FuotaDeploymentModel>
    where
        C: ConnectionTrait,
    {
        Ok(deployment.insert(db).await?)
    }

    pub async fn find_by_id<C>(id: Uuid, db: &C) -> StorageResult<Option<FuotaDeploymentModel>>
    where
        C: ConnectionTrait,
    {
        Ok(FuotaDeployment::find_by_id(id).one(db).await?)
    }

    /// Deployments whose next step is due, oldest first. Rows held by
    /// another scheduler are skipped.
    pub async fn find_due<C>(
        now: DateTime<Utc>,
        limit: u64,
        db: &C,
    ) -> StorageResult<Vec<FuotaDeploymentModel>>
    where
        C: ConnectionTrait,
    {
        Ok(FuotaDeployment::find()
            .filter(FuotaDeploymentColumn::State.ne(FuotaState::Done))
            .filter(FuotaDeploymentColumn::NextStepAfter.lte(now))
            .order_by_asc(FuotaDeploymentColumn::NextStepAfter)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(db)
            .await?)
    }

    pub async fn update<C>(
        deployment: FuotaDeploymentActiveModel,
        db: &C,
    ) -> StorageResult<FuotaDeploymentModel>
    where
        C: ConnectionTrait,
    {
        Ok(deployment.update(db).await?)
    }

    /// Deployments still referencing the multicast group.
    pub async fn count_for_multicast_group<C>(multicast_group_id: Uuid, db: &C) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        Ok(FuotaDeployment::find()
            .filter(FuotaDeploymentColumn::MulticastGroupId.eq(multicast_group_id))
            .count(db)
            .await?)
    }

    /// Postpones the next step without changing the state.
    pub async fn postpone<C>(
        deployment: FuotaDeploymentModel,
        next_step_after: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<FuotaDeploymentModel>
    where
        C: ConnectionTrait,
    {
        let mut am: FuotaDeploymentActiveModel = deployment.into();
        am.next_step_after = Set(next_step_after);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }
}

/// Repository for the per-device outcome of a deployment
pub struct FuotaDeploymentDeviceRepository;

impl FuotaDeploymentDeviceRepository {
    pub async fn create<C>(
        row: FuotaDeploymentDeviceActiveModel,
        db: &C,
    ) -> StorageResult<FuotaDeploymentDeviceModel>
    where
        C: ConnectionTrait,
    {
        Ok(row.insert(db).await?)
    }

    pub async fn find<C>(
        fuota_deployment_id: Uuid,
        dev_eui: &[u8],
        db: &C,
    ) -> StorageResult<Option<FuotaDeploymentDeviceModel>>
    where
        C: ConnectionTrait,
    {
        Ok(FuotaDeploymentDevice::find_by_id((fuota_deployment_id, dev_eui.to_vec()))
            .one(db)
            .await?)
    }

    pub async fn find_for_deployment<C>(
        fuota_deployment_id: Uuid,
        db: &C,
    ) -> StorageResult<Vec<FuotaDeploymentDeviceModel>>
    where
        C: ConnectionTrait,
    {
        Ok(FuotaDeploymentDevice::find()
            .filter(FuotaDeploymentDeviceColumn::FuotaDeploymentId.eq(fuota_deployment_id))
            .order_by_asc(FuotaDeploymentDeviceColumn::DevEui)
            .all(db)
            .await?)
    }

    pub async fn set_state<C>(
        fuota_deployment_id: Uuid,
        dev_eui: &[u8],
        state: FuotaDeviceState,
        error_message: &str,
        db: &C,
    ) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let res = FuotaDeploymentDevice::update_many()
            .col_expr(FuotaDeploymentDeviceColumn::State, Expr::value(state))
            .col_expr(
                FuotaDeploymentDeviceColumn::ErrorMessage,
                Expr::value(error_message.to_string()),
            )
            .col_expr(FuotaDeploymentDeviceColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(FuotaDeploymentDeviceColumn::FuotaDeploymentId.eq(fuota_deployment_id))
            .filter(FuotaDeploymentDeviceColumn::DevEui.eq(dev_eui.to_vec()))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Pending devices without a provisioned multicast setup for the group
    /// are moved to `Error`.
    pub async fn fail_without_multicast_setup<C>(
        fuota_deployment_id: Uuid,
        multicast_group_id: Uuid,
        error_message: &str,
        db: &C,
    ) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let provisioned = Query::select()
            .column(RemoteMulticastSetupColumn::DevEui)
            .from(RemoteMulticastSetup)
            .and_where(RemoteMulticastSetupColumn::MulticastGroupId.eq(multicast_group_id))
            .and_where(RemoteMulticastSetupColumn::StateProvisioned.eq(true))
            .to_owned();
        Self::fail_pending(
            fuota_deployment_id,
            Some(FuotaDeploymentDeviceColumn::DevEui.not_in_subquery(provisioned)),
            error_message,
            db,
        )
        .await
    }

    /// Pending devices without a provisioned fragmentation session for the
    /// deployment are moved to `Error`.
    pub async fn fail_without_fragmentation_session<C>(
        fuota_deployment_id: Uuid,
        error_message: &str,
        db: &C,
    ) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let provisioned = Query::select()
            .column(RemoteFragmentationSessionColumn::DevEui)
            .from(RemoteFragmentationSession)
            .and_where(RemoteFragmentationSessionColumn::FuotaDeploymentId.eq(fuota_deployment_id))
            .and_where(RemoteFragmentationSessionColumn::StateProvisioned.eq(true))
            .to_owned();
        Self::fail_pending(
            fuota_deployment_id,
            Some(FuotaDeploymentDeviceColumn::DevEui.not_in_subquery(provisioned)),
            error_message,
            db,
        )
        .await
    }

    /// Every device still `Pending` is moved to `Error`.
    pub async fn fail_remaining<C>(
        fuota_deployment_id: Uuid,
        error_message: &str,
        db: &C,
    ) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        Self::fail_pending(fuota_deployment_id, None, error_message, db).await
    }

    async fn fail_pending<C>(
        fuota_deployment_id: Uuid,
        condition: Option<sea_orm::sea_query::SimpleExpr>,
        error_message: &str,
        db: &C,
    ) -> StorageResult<u64>
    where
        C: ConnectionTrait,
    {
        let mut stmt = FuotaDeploymentDevice::update_many()
            .col_expr(
                FuotaDeploymentDeviceColumn::State,
                Expr::value(FuotaDeviceState::Error),
            )
            .col_expr(
                FuotaDeploymentDeviceColumn::ErrorMessage,
                Expr::value(error_message.to_string()),
            )
            .col_expr(FuotaDeploymentDeviceColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(FuotaDeploymentDeviceColumn::FuotaDeploymentId.eq(fuota_deployment_id))
            .filter(FuotaDeploymentDeviceColumn::State.eq(FuotaDeviceState::Pending));
        if let Some(cond) = condition {
            stmt = stmt.filter(cond);
        }
        Ok(stmt.exec(db).await?.rows_affected)
    }
}
