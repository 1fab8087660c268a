use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub dev_eui: Vec<u8>,
    pub f_cnt: i64,
    pub f_port: i16,
    pub confirmed: bool,
    /// Set while a confirmed class-C item awaits its acknowledgement.
    pub is_pending: bool,
    /// Encrypted FRMPayload.
    pub frm_payload: Vec<u8>,
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
}

impl ActiveModelBehavior for ActiveModel {}
