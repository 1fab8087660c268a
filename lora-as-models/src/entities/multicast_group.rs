use crate::enums::common::MulticastGroupType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "multicast_group")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub application_id: i32,
    pub mc_addr: Vec<u8>,
    pub mc_nwk_s_key: Vec<u8>,
    pub mc_app_s_key: Vec<u8>,
    pub mc_key: Vec<u8>,
    /// Next downlink frame-counter, advanced by one per enqueue.
    pub f_cnt: i64,
    pub group_type: MulticastGroupType,
    pub dr: i16,
    pub frequency: i64,
    pub ping_slot_period: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::application::Entity",
        from = "Column::ApplicationId",
        to = "super::application::Column::Id",
        on_delete = "Cascade"
    )]
    Application,
    #[sea_orm(has_many = "super::device_multicast_group::Entity")]
    DeviceMulticastGroup,
}

impl Related<super::device_multicast_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceMulticastGroup.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
