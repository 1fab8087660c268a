use crate::enums::common::RemoteCommandState;
use sea_orm::{entity::prelude::*, FromJsonQueryResult};
use serde::{Deserialize, Serialize};

/// A FragSessionSetupReq / FragSessionDeleteReq to be delivered to one device.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "remote_fragmentation_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub dev_eui: Vec<u8>,
    #[sea_orm(primary_key, auto_increment = false)]
    pub frag_index: i16,
    /// Deployment that requested the session, used for garbage collection.
    pub fuota_deployment_id: Option<Uuid>,
    pub mc_group_ids: McGroupIds,
    pub nb_frag: i32,
    pub frag_size: i32,
    pub fragmentation_matrix: i16,
    pub block_ack_delay: i16,
    pub padding: i16,
    pub descriptor: Vec<u8>,
    pub state: RemoteCommandState,
    pub state_provisioned: bool,
    pub retry_after: DateTimeUtc,
    pub retry_count: i32,
    pub retry_interval_secs: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Device multicast slots allowed to carry the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct McGroupIds(pub Vec<u8>);

impl McGroupIds {
    /// Bit mask as carried by FragSessionSetupReq.
    pub fn bit_mask(&self) -> u8 {
        self.0
            .iter()
            .filter(|id| **id < 4)
            .fold(0u8, |mask, id| mask | (1 << id))
    }
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
        belongs_to = "super::fuota_deployment::Entity",
        from = "Column::FuotaDeploymentId",
        to = "super::fuota_deployment::Column::Id",
        on_delete = "SetNull"
    )]
    FuotaDeployment,
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::McGroupIds;

    #[test]
    fn bit_mask_ignores_out_of_range_slots() {
        assert_eq!(McGroupIds(vec![0, 2]).bit_mask(), 0b0101);
        assert_eq!(McGroupIds(vec![3, 7]).bit_mask(), 0b1000);
    }
}
