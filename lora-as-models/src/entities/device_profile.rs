use crate::enums::common::PayloadCodec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_profile")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub organization_id: i64,
    pub network_server_id: i32,
    /// LoRaWAN MAC version, e.g. `1.0.2` or `1.1.0`.
    pub mac_version: String,
    pub reg_params_revision: String,
    pub supports_join: bool,
    pub supports_class_b: bool,
    pub supports_class_c: bool,
    pub payload_codec: PayloadCodec,
    pub payload_encoder_script: String,
    pub payload_decoder_script: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Whether the profile describes a LoRaWAN 1.1 device.
    #[inline]
    pub fn is_lorawan_11(&self) -> bool {
        self.mac_version.starts_with("1.1")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::network_server::Entity",
        from = "Column::NetworkServerId",
        to = "super::network_server::Column::Id",
        on_delete = "Cascade"
    )]
    NetworkServer,
    #[sea_orm(has_many = "super::device::Entity")]
    Device,
}

impl Related<super::network_server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NetworkServer.def()
    }
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
