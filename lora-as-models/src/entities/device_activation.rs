use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_activation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub dev_eui: Vec<u8>,
    pub dev_addr: Vec<u8>,
    pub app_s_key: Vec<u8>,
    /// FNwkSIntKey for LoRaWAN 1.0 devices.
    pub nwk_s_key: Vec<u8>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DevEui",
        to = "super::device::Column::DevEui",
        on_delete = "Cascade"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
