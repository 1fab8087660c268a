//! `SeaORM` Entity for end-devices

use sea_orm::{entity::prelude::*, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub dev_eui: Vec<u8>,
    pub application_id: i32,
    pub device_profile_id: Uuid,
    pub name: String,
    pub description: String,
    /// Last DevAddr seen in an uplink, empty until the first activation.
    pub dev_addr: Vec<u8>,
    pub variables: KeyValues,
    pub tags: KeyValues,
    pub device_status_battery: Option<i16>,
    pub device_status_margin: Option<i16>,
    pub device_status_external_power_source: bool,
    pub last_seen_at: Option<DateTimeUtc>,
    pub dr: Option<i16>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Free-form string map stored as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct KeyValues(pub HashMap<String, String>);

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
        belongs_to = "super::device_profile::Entity",
        from = "Column::DeviceProfileId",
        to = "super::device_profile::Column::Id",
        on_delete = "Cascade"
    )]
    DeviceProfile,
    #[sea_orm(has_one = "super::device_keys::Entity")]
    DeviceKeys,
    #[sea_orm(has_many = "super::device_activation::Entity")]
    DeviceActivation,
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Application.def()
    }
}

impl Related<super::device_profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceProfile.def()
    }
}

impl Related<super::device_keys::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceKeys.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
