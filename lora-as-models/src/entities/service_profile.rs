use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_profile")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub organization_id: i64,
    pub network_server_id: i32,
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
    #[sea_orm(has_many = "super::application::Entity")]
    Application,
}

impl Related<super::network_server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NetworkServer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
