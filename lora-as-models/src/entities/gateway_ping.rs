use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway_ping")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub gateway_mac: Vec<u8>,
    pub frequency: i64,
    pub dr: i16,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::gateway::Entity",
        from = "Column::GatewayMac",
        to = "super::gateway::Column::Mac",
        on_delete = "Cascade"
    )]
    Gateway,
    #[sea_orm(has_many = "super::gateway_ping_rx::Entity")]
    GatewayPingRx,
}

impl Related<super::gateway_ping_rx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GatewayPingRx.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
