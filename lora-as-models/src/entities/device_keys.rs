use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Root keys of an OTAA device plus the join-server nonce counter.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub dev_eui: Vec<u8>,
    pub app_key: Vec<u8>,
    pub nwk_key: Vec<u8>,
    /// Only used by LoRaWAN 1.0 devices for multicast key derivation.
    pub gen_app_key: Vec<u8>,
    /// Last JoinNonce handed out. Never exceeds 2^24 - 1.
    pub join_nonce: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
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
