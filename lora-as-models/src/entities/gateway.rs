use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub mac: Vec<u8>,
    pub name: String,
    pub organization_id: i64,
    pub network_server_id: i32,
    /// Whether the gateway takes part in discovery pings.
    pub ping: bool,
    pub last_ping_id: Option<i32>,
    pub last_ping_sent_at: Option<DateTimeUtc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
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
}

impl Related<super::network_server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NetworkServer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
