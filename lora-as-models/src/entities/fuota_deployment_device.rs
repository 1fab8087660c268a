use crate::enums::fuota::FuotaDeviceState;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fuota_deployment_device")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub fuota_deployment_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub dev_eui: Vec<u8>,
    pub state: FuotaDeviceState,
    pub error_message: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::fuota_deployment::Entity",
        from = "Column::FuotaDeploymentId",
        to = "super::fuota_deployment::Column::Id",
        on_delete = "Cascade"
    )]
    FuotaDeployment,
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DevEui",
        to = "super::device::Column::DevEui",
        on_delete = "Cascade"
    )]
    Device,
}

impl Related<super::fuota_deployment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FuotaDeployment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
