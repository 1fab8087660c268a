use crate::enums::common::MulticastGroupType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A McClassCSessionReq (or McClassBSessionReq for class-B groups) to be
/// delivered to one device.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "remote_multicast_class_c_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub dev_eui: Vec<u8>,
    #[sea_orm(primary_key, auto_increment = false)]
    pub multicast_group_id: Uuid,
    pub mc_group_id: i16,
    pub session_time: DateTimeUtc,
    /// Log2 exponent of the session duration.
    pub session_time_out: i16,
    pub dl_frequency: i64,
    pub dr: i16,
    pub group_type: MulticastGroupType,
    pub ping_slot_period: i32,
    pub state_provisioned: bool,
    pub retry_after: DateTimeUtc,
    pub retry_count: i32,
    pub retry_interval_secs: i64,
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
    #[sea_orm(
        belongs_to = "super::multicast_group::Entity",
        from = "Column::MulticastGroupId",
        to = "super::multicast_group::Column::Id",
        on_delete = "Cascade"
    )]
    MulticastGroup,
}

impl ActiveModelBehavior for ActiveModel {}
