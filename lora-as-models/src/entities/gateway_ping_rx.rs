use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reception of a discovery ping by a gateway other than the sender.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway_ping_rx")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub ping_id: i32,
    pub gateway_mac: Vec<u8>,
    pub received_at: Option<DateTimeUtc>,
    pub rssi: i32,
    pub lora_snr: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::gateway_ping::Entity",
        from = "Column::PingId",
        to = "super::gateway_ping::Column::Id",
        on_delete = "Cascade"
    )]
    GatewayPing,
}

impl Related<super::gateway_ping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GatewayPing.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
