use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{Application, ApplicationActiveModel, ApplicationModel};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait};

/// Repository for applications
pub struct ApplicationRepository;

impl ApplicationRepository {
    pub async fn create<C>(app: ApplicationActiveModel, db: &C) -> StorageResult<ApplicationModel>
    where
        C: ConnectionTrait,
    {
        Ok(app.insert(db).await?)
    }

    pub async fn find_by_id<C>(id: i32, db: &C) -> StorageResult<Option<ApplicationModel>>
    where
        C: ConnectionTrait,
    {
        Ok(Application::find_by_id(id).one(db).await?)
    }
}
