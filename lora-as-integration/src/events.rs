//! Event contracts published to every sink.
//!
//! The structs derive both `prost::Message` (protobuf marshaler) and serde
//! (JSON marshalers). Identifiers are rendered as hex strings in JSON, payload
//! bytes as base64.
use lora_as_lorawan::EUI64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Up,
    Join,
    Ack,
    Error,
    Status,
    Location,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Up => "up",
            EventType::Join => "join",
            EventType::Ack => "ack",
            EventType::Error => "error",
            EventType::Status => "status",
            EventType::Location => "location",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Location {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
    #[prost(double, tag = "3")]
    pub altitude: f64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RxInfo {
    #[prost(bytes = "vec", tag = "1")]
    #[serde(rename = "gatewayID", with = "hex_bytes")]
    pub gateway_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub name: String,
    /// RFC 3339 reception time, when the gateway has a synchronized clock.
    #[prost(string, optional, tag = "3")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[prost(int32, tag = "4")]
    pub rssi: i32,
    #[prost(double, tag = "5")]
    #[serde(rename = "loRaSNR")]
    pub lora_snr: f64,
    #[prost(message, optional, tag = "6")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxInfo {
    #[prost(uint32, tag = "1")]
    pub frequency: u32,
    #[prost(uint32, tag = "2")]
    pub dr: u32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UplinkEvent {
    #[prost(uint64, tag = "1")]
    #[serde(rename = "applicationID", with = "u64_string")]
    pub application_id: u64,
    #[prost(string, tag = "2")]
    pub application_name: String,
    #[prost(string, tag = "3")]
    pub device_name: String,
    #[prost(bytes = "vec", tag = "4")]
    #[serde(rename = "devEUI", with = "hex_bytes")]
    pub dev_eui: Vec<u8>,
    #[prost(message, repeated, tag = "5")]
    pub rx_info: Vec<RxInfo>,
    #[prost(message, optional, tag = "6")]
    pub tx_info: Option<TxInfo>,
    #[prost(bool, tag = "7")]
    pub adr: bool,
    #[prost(uint32, tag = "8")]
    pub dr: u32,
    #[prost(uint32, tag = "9")]
    pub f_cnt: u32,
    #[prost(uint32, tag = "10")]
    pub f_port: u32,
    #[prost(bytes = "vec", tag = "11")]
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Codec output, JSON encoded. Empty when no codec is configured.
    #[prost(string, tag = "12")]
    #[serde(skip)]
    pub object_json: String,
    #[prost(map = "string, string", tag = "13")]
    pub tags: HashMap<String, String>,
    #[prost(bool, tag = "14")]
    pub confirmed_uplink: bool,
    #[prost(bytes = "vec", tag = "15")]
    #[serde(with = "hex_bytes")]
    pub dev_addr: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinEvent {
    #[prost(uint64, tag = "1")]
    #[serde(rename = "applicationID", with = "u64_string")]
    pub application_id: u64,
    #[prost(string, tag = "2")]
    pub application_name: String,
    #[prost(string, tag = "3")]
    pub device_name: String,
    #[prost(bytes = "vec", tag = "4")]
    #[serde(rename = "devEUI", with = "hex_bytes")]
    pub dev_eui: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    #[serde(with = "hex_bytes")]
    pub dev_addr: Vec<u8>,
    #[prost(message, repeated, tag = "6")]
    pub rx_info: Vec<RxInfo>,
    #[prost(message, optional, tag = "7")]
    pub tx_info: Option<TxInfo>,
    #[prost(uint32, tag = "8")]
    pub dr: u32,
    #[prost(map = "string, string", tag = "9")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AckEvent {
    #[prost(uint64, tag = "1")]
    #[serde(rename = "applicationID", with = "u64_string")]
    pub application_id: u64,
    #[prost(string, tag = "2")]
    pub application_name: String,
    #[prost(string, tag = "3")]
    pub device_name: String,
    #[prost(bytes = "vec", tag = "4")]
    #[serde(rename = "devEUI", with = "hex_bytes")]
    pub dev_eui: Vec<u8>,
    #[prost(bool, tag = "5")]
    pub acknowledged: bool,
    #[prost(uint32, tag = "6")]
    pub f_cnt: u32,
    #[prost(map = "string, string", tag = "7")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorEvent {
    #[prost(uint64, tag = "1")]
    #[serde(rename = "applicationID", with = "u64_string")]
    pub application_id: u64,
    #[prost(string, tag = "2")]
    pub application_name: String,
    #[prost(string, tag = "3")]
    pub device_name: String,
    #[prost(bytes = "vec", tag = "4")]
    #[serde(rename = "devEUI", with = "hex_bytes")]
    pub dev_eui: Vec<u8>,
    /// e.g. `UPLINK_CODEC`, `DOWNLINK_PAYLOAD_SIZE`, `OTAA`.
    #[prost(string, tag = "5")]
    #[serde(rename = "type")]
    pub error_type: String,
    #[prost(string, tag = "6")]
    pub error: String,
    #[prost(uint32, tag = "7")]
    pub f_cnt: u32,
    #[prost(map = "string, string", tag = "8")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusEvent {
    #[prost(uint64, tag = "1")]
    #[serde(rename = "applicationID", with = "u64_string")]
    pub application_id: u64,
    #[prost(string, tag = "2")]
    pub application_name: String,
    #[prost(string, tag = "3")]
    pub device_name: String,
    #[prost(bytes = "vec", tag = "4")]
    #[serde(rename = "devEUI", with = "hex_bytes")]
    pub dev_eui: Vec<u8>,
    #[prost(int32, tag = "5")]
    pub margin: i32,
    #[prost(bool, tag = "6")]
    pub external_power_source: bool,
    #[prost(bool, tag = "7")]
    pub battery_level_unavailable: bool,
    /// Percentage, 0..=100.
    #[prost(float, tag = "8")]
    pub battery_level: f32,
    #[prost(map = "string, string", tag = "9")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationEvent {
    #[prost(uint64, tag = "1")]
    #[serde(rename = "applicationID", with = "u64_string")]
    pub application_id: u64,
    #[prost(string, tag = "2")]
    pub application_name: String,
    #[prost(string, tag = "3")]
    pub device_name: String,
    #[prost(bytes = "vec", tag = "4")]
    #[serde(rename = "devEUI", with = "hex_bytes")]
    pub dev_eui: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub location: Option<Location>,
    #[prost(uint32, tag = "6")]
    pub f_cnt: u32,
    #[prost(map = "string, string", tag = "7")]
    pub tags: HashMap<String, String>,
}

/// Borrowed view over one event, used by sinks that publish every kind the
/// same way.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Up(&'a UplinkEvent),
    Join(&'a JoinEvent),
    Ack(&'a AckEvent),
    Error(&'a ErrorEvent),
    Status(&'a StatusEvent),
    Location(&'a LocationEvent),
}

impl Event<'_> {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Up(_) => EventType::Up,
            Event::Join(_) => EventType::Join,
            Event::Ack(_) => EventType::Ack,
            Event::Error(_) => EventType::Error,
            Event::Status(_) => EventType::Status,
            Event::Location(_) => EventType::Location,
        }
    }

    pub fn application_id(&self) -> u64 {
        match self {
            Event::Up(e) => e.application_id,
            Event::Join(e) => e.application_id,
            Event::Ack(e) => e.application_id,
            Event::Error(e) => e.application_id,
            Event::Status(e) => e.application_id,
            Event::Location(e) => e.application_id,
        }
    }

    pub fn dev_eui_bytes(&self) -> &[u8] {
        match self {
            Event::Up(e) => &e.dev_eui,
            Event::Join(e) => &e.dev_eui,
            Event::Ack(e) => &e.dev_eui,
            Event::Error(e) => &e.dev_eui,
            Event::Status(e) => &e.dev_eui,
            Event::Location(e) => &e.dev_eui,
        }
    }

    /// DevEUI as hex, falls back to the raw hex encoding for malformed lengths.
    pub fn dev_eui(&self) -> String {
        let b = self.dev_eui_bytes();
        EUI64::from_slice(b)
            .map(|e| e.to_string())
            .unwrap_or_else(|_| hex::encode(b))
    }
}

/// Downlink request received from an integration (MQTT command topic,
/// AMQP routing key) or an API caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDownPayload {
    #[serde(rename = "applicationID", default)]
    pub application_id: i64,
    #[serde(rename = "devEUI", default)]
    pub dev_eui: EUI64,
    #[serde(default)]
    pub confirmed: bool,
    pub f_port: u8,
    #[serde(default, with = "base64_bytes_opt")]
    pub data: Option<Vec<u8>>,
    /// Encoded with the device-profile codec when `data` is absent.
    #[serde(default)]
    pub object: Option<Value>,
    /// Caller supplied identifier, part of the de-duplication lock key.
    #[serde(default)]
    pub reference: String,
}

impl DataDownPayload {
    /// Parses a JSON command body. Identifiers taken from the topic or
    /// routing key override the body.
    pub fn from_message(
        application_id: i64,
        dev_eui: EUI64,
        body: &[u8],
    ) -> Result<Self, serde_json::Error> {
        let mut pl: DataDownPayload = serde_json::from_slice(body)?;
        pl.application_id = application_id;
        pl.dev_eui = dev_eui;
        Ok(pl)
    }
}

pub(crate) mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(b))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(de::Error::custom)
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(b))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(de::Error::custom)
    }
}

pub(crate) mod base64_bytes_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match b {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) if !s.is_empty() => STANDARD.decode(s).map(Some).map_err(de::Error::custom),
            _ => Ok(None),
        }
    }
}

pub(crate) mod u64_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }
        match Repr::deserialize(d)? {
            Repr::Num(n) => Ok(n),
            Repr::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downlink_identifiers_come_from_topic() {
        let dev_eui: EUI64 = "0102030405060708".parse().unwrap();
        let body = br#"{"applicationID":99,"devEUI":"ffffffffffffffff","confirmed":true,"fPort":10,"data":"AQIDBA==","reference":"abc"}"#;
        let pl = DataDownPayload::from_message(1, dev_eui, body).unwrap();
        assert_eq!(pl.application_id, 1);
        assert_eq!(pl.dev_eui, dev_eui);
        assert_eq!(pl.data, Some(vec![1, 2, 3, 4]));
        assert_eq!(pl.reference, "abc");
        assert!(pl.object.is_none());
    }

    #[test]
    fn event_view_accessors() {
        let ev = AckEvent {
            application_id: 7,
            dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            acknowledged: true,
            ..Default::default()
        };
        let view = Event::Ack(&ev);
        assert_eq!(view.event_type(), EventType::Ack);
        assert_eq!(view.application_id(), 7);
        assert_eq!(view.dev_eui(), "0102030405060708");
    }
}
