use sea_orm::{sea_query::StringLen, DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{Display, Formatter};

/// Payload codec configured on a device-profile.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PayloadCodec {
    #[default]
    #[sea_orm(string_value = "NONE")]
    #[serde(rename = "NONE")]
    None,
    #[sea_orm(string_value = "CAYENNE_LPP")]
    #[serde(rename = "CAYENNE_LPP")]
    CayenneLpp,
    #[sea_orm(string_value = "CUSTOM_JS")]
    #[serde(rename = "CUSTOM_JS")]
    CustomJs,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum MulticastGroupType {
    #[sea_orm(string_value = "B")]
    #[serde(rename = "B")]
    ClassB,
    #[default]
    #[sea_orm(string_value = "C")]
    #[serde(rename = "C")]
    ClassC,
}

impl Display for MulticastGroupType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MulticastGroupType::ClassB => f.write_str("B"),
            MulticastGroupType::ClassC => f.write_str("C"),
        }
    }
}

/// Desired state of a remotely provisioned object.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize_repr, Deserialize_repr,
)]
#[sea_orm(rs_type = "i16", db_type = "SmallInteger")]
#[repr(i16)]
pub enum RemoteCommandState {
    Setup = 0,
    Delete = 1,
}
