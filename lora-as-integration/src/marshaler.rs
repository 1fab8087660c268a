use crate::{
    error::{IntegrationError, IntegrationResult},
    events::Event,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload encoding shared by every sink of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marshaler {
    Protobuf,
    /// Protobuf JSON mapping: bytes as base64, codec output as `objectJSON`.
    #[default]
    Json,
    /// Legacy JSON: identifiers as hex, codec output inlined as `object`.
    JsonV3,
}

impl Marshaler {
    pub fn content_type(&self) -> &'static str {
        match self {
            Marshaler::Protobuf => "application/octet-stream",
            Marshaler::Json | Marshaler::JsonV3 => "application/json",
        }
    }

    pub fn marshal(&self, event: Event<'_>) -> IntegrationResult<Vec<u8>> {
        match self {
            Marshaler::Protobuf => Ok(match event {
                Event::Up(e) => e.encode_to_vec(),
                Event::Join(e) => e.encode_to_vec(),
                Event::Ack(e) => e.encode_to_vec(),
                Event::Error(e) => e.encode_to_vec(),
                Event::Status(e) => e.encode_to_vec(),
                Event::Location(e) => e.encode_to_vec(),
            }),
            Marshaler::Json => {
                let mut v = to_value(event)?;
                hex_to_base64(&mut v);
                if let (Event::Up(e), Value::Object(obj)) = (event, &mut v) {
                    if !e.object_json.is_empty() {
                        obj.insert("objectJSON".into(), Value::String(e.object_json.clone()));
                    }
                }
                Ok(serde_json::to_vec(&v)?)
            }
            Marshaler::JsonV3 => {
                let mut v = to_value(event)?;
                if let (Event::Up(e), Value::Object(obj)) = (event, &mut v) {
                    if !e.object_json.is_empty() {
                        let object: Value = serde_json::from_str(&e.object_json)
                            .map_err(|e| IntegrationError::Marshal(format!("object: {e}")))?;
                        obj.insert("object".into(), object);
                    }
                }
                Ok(serde_json::to_vec(&v)?)
            }
        }
    }
}

fn to_value(event: Event<'_>) -> IntegrationResult<Value> {
    Ok(match event {
        Event::Up(e) => serde_json::to_value(e)?,
        Event::Join(e) => serde_json::to_value(e)?,
        Event::Ack(e) => serde_json::to_value(e)?,
        Event::Error(e) => serde_json::to_value(e)?,
        Event::Status(e) => serde_json::to_value(e)?,
        Event::Location(e) => serde_json::to_value(e)?,
    })
}

const BYTE_FIELDS: [&str; 3] = ["devEUI", "devAddr", "gatewayID"];

/// Re-encodes the hex identifier fields as base64, recursively.
fn hex_to_base64(v: &mut Value) {
    match v {
        Value::Object(obj) => convert_object(obj),
        Value::Array(items) => items.iter_mut().for_each(hex_to_base64),
        _ => {}
    }
}

fn convert_object(obj: &mut Map<String, Value>) {
    for (k, v) in obj.iter_mut() {
        if BYTE_FIELDS.contains(&k.as_str()) {
            if let Some(bytes) = v.as_str().and_then(|s| hex::decode(s).ok()) {
                *v = Value::String(STANDARD.encode(bytes));
            }
        } else {
            hex_to_base64(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RxInfo, UplinkEvent};

    fn uplink() -> UplinkEvent {
        UplinkEvent {
            application_id: 1,
            application_name: "app".into(),
            device_name: "dev".into(),
            dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            rx_info: vec![RxInfo {
                gateway_id: vec![8, 7, 6, 5, 4, 3, 2, 1],
                rssi: -60,
                ..Default::default()
            }],
            f_port: 10,
            data: vec![1, 2, 3],
            object_json: r#"{"temperature":21.5}"#.into(),
            ..Default::default()
        }
    }

    #[test]
    fn json_v3_inlines_object_and_keeps_hex() {
        let ev = uplink();
        let b = Marshaler::JsonV3.marshal(Event::Up(&ev)).unwrap();
        let v: Value = serde_json::from_slice(&b).unwrap();
        assert_eq!(v["applicationID"], "1");
        assert_eq!(v["devEUI"], "0102030405060708");
        assert_eq!(v["rxInfo"][0]["gatewayID"], "0807060504030201");
        assert_eq!(v["data"], "AQID");
        assert_eq!(v["object"]["temperature"], 21.5);
        assert_eq!(v["fPort"], 10);
    }

    #[test]
    fn json_uses_base64_identifiers() {
        let ev = uplink();
        let b = Marshaler::Json.marshal(Event::Up(&ev)).unwrap();
        let v: Value = serde_json::from_slice(&b).unwrap();
        assert_eq!(v["devEUI"], "AQIDBAUGBwg=");
        assert_eq!(v["rxInfo"][0]["gatewayID"], "CAcGBQQDAgE=");
        assert_eq!(v["objectJSON"], r#"{"temperature":21.5}"#);
        assert!(v.get("object").is_none());
    }

    #[test]
    fn protobuf_decodes_back() {
        let ev = uplink();
        let b = Marshaler::Protobuf.marshal(Event::Up(&ev)).unwrap();
        assert_eq!(UplinkEvent::decode(b.as_slice()).unwrap(), ev);
    }

    #[test]
    fn parses_from_config_names() {
        let m: Marshaler = serde_json::from_str("\"json_v3\"").unwrap();
        assert_eq!(m, Marshaler::JsonV3);
        assert_eq!(Marshaler::default(), Marshaler::Json);
    }
}
