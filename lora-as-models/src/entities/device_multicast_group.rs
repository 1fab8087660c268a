use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_multicast_group")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub dev_eui: Vec<u8>,
    #[sea_orm(primary_key, auto_increment = false)]
    pub multicast_group_id: Uuid,
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
    #[sea_orm(
        belongs_to = "super::multicast_group::Entity",
        from = "Column::MulticastGroupId",
        to = "super::multicast_group::Column::Id",
        on_delete = "Cascade"
    )]
    MulticastGroup,
}

impl Related<super::multicast_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MulticastGroup.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
