//! `SeaORM` Entity for firmware-update-over-the-air deployments

use crate::enums::{common::MulticastGroupType, fuota::FuotaState};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fuota_deployment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub application_id: i32,
    /// Set by the multicast-create step and cleared on cleanup.
    pub multicast_group_id: Option<Uuid>,
    pub group_type: MulticastGroupType,
    pub dr: i16,
    pub frequency: i64,
    pub ping_slot_period: i32,
    pub fragmentation_matrix: i16,
    pub descriptor: Vec<u8>,
    pub payload: Vec<u8>,
    pub frag_size: i32,
    pub redundancy: i32,
    pub block_ack_delay: i16,
    /// Session timeout as a log2 exponent.
    pub multicast_timeout: i16,
    pub unicast_timeout_secs: i64,
    pub state: FuotaState,
    pub next_step_after: DateTimeUtc,
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
    #[sea_orm(
        belongs_to = "super::multicast_group::Entity",
        from = "Column::MulticastGroupId",
        to = "super::multicast_group::Column::Id",
        on_delete = "SetNull"
    )]
    MulticastGroup,
    #[sea_orm(has_many = "super::fuota_deployment_device::Entity")]
    FuotaDeploymentDevice,
}

impl Related<super::fuota_deployment_device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FuotaDeploymentDevice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
