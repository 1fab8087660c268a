use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "network_server")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// `host:port` of the network-server API.
    pub server: String,
    pub gateway_discovery_enabled: bool,
    /// Number of pings per gateway per day.
    pub gateway_discovery_interval: i32,
    pub gateway_discovery_tx_frequency: i64,
    pub gateway_discovery_dr: i16,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::gateway::Entity")]
    Gateway,
    #[sea_orm(has_many = "super::service_profile::Entity")]
    ServiceProfile,
    #[sea_orm(has_many = "super::device_profile::Entity")]
    DeviceProfile,
}

impl Related<super::gateway::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Gateway.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
