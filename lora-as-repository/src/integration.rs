use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    Integration, IntegrationActiveModel, IntegrationColumn, IntegrationModel,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
};

/// Repository for per-application integration rows
pub struct IntegrationRepository;

impl IntegrationRepository {
    pub async fn create<C>(row: IntegrationActiveModel, db: &C) -> StorageResult<IntegrationModel>
    where
        C: ConnectionTrait,
    {
        Ok(row.insert(db).await?)
    }

    pub async fn find_by_application<C>(
        application_id: i32,
        db: &C,
    ) -> StorageResult<Vec<IntegrationModel>>
    where
        C: ConnectionTrait,
    {
        Ok(Integration::find()
            .filter(IntegrationColumn::ApplicationId.eq(application_id))
            .order_by_asc(IntegrationColumn::Id)
            .all(db)
            .await?)
    }

    pub async fn delete<C>(id: i32, db: &C) -> StorageResult<()>
    where
        C: ConnectionTrait,
    {
        Integration::delete_by_id(id).exec(db).await?;
        Ok(())
    }
}
