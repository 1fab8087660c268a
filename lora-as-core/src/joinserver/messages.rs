//! Backend Interfaces (TS002) JSON messages handled by the join-server.
use lora_as_lorawan::{DevAddr, EUI64};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    JoinReq,
    JoinAns,
    RejoinReq,
    RejoinAns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    MICFailed,
    UnknownDevEUI,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnswerResult {
    pub result_code: ResultCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A session key, wrapped with the KEK named by `kek_label` or in clear
/// when the label is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    #[serde(rename = "KEKLabel", default)]
    pub kek_label: String,
    #[serde(rename = "AESKey", with = "hex_bytes")]
    pub aes_key: Vec<u8>,
}

/// Requests accepted on the join-server endpoint, tagged by `MessageType`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "MessageType")]
pub enum BackendRequest {
    JoinReq(JoinReqPayload),
    RejoinReq(RejoinReqPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinReqPayload {
    #[serde(default)]
    pub protocol_version: String,
    /// NetID of the requesting network-server, as hex.
    #[serde(rename = "SenderID")]
    pub sender_id: String,
    /// JoinEUI, as hex.
    #[serde(rename = "ReceiverID")]
    pub receiver_id: String,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: u32,
    #[serde(rename = "MACVersion", default)]
    pub mac_version: String,
    #[serde(rename = "PHYPayload", with = "hex_bytes")]
    pub phy_payload: Vec<u8>,
    #[serde(rename = "DevEUI")]
    pub dev_eui: EUI64,
    pub dev_addr: DevAddr,
    #[serde(rename = "DLSettings", with = "hex_bytes")]
    pub dl_settings: Vec<u8>,
    pub rx_delay: u8,
    #[serde(rename = "CFList", default, with = "hex_bytes_opt")]
    pub cf_list: Option<Vec<u8>>,
}

/// Same layout as a join-request, the PHYPayload carries a rejoin-request.
pub type RejoinReqPayload = JoinReqPayload;

/// Answer to a join or rejoin request. Errors travel in `result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinAnsPayload {
    pub protocol_version: String,
    #[serde(rename = "SenderID")]
    pub sender_id: String,
    #[serde(rename = "ReceiverID")]
    pub receiver_id: String,
    #[serde(rename = "TransactionID")]
    pub transaction_id: u32,
    pub message_type: MessageType,
    pub result: AnswerResult,
    #[serde(
        rename = "PHYPayload",
        default,
        with = "hex_bytes_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub phy_payload: Option<Vec<u8>>,
    /// LoRaWAN 1.0.x network session key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nwk_s_key: Option<KeyEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f_nwk_s_int_key: Option<KeyEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s_nwk_s_int_key: Option<KeyEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nwk_s_enc_key: Option<KeyEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<KeyEnvelope>,
}

impl JoinAnsPayload {
    /// Answer skeleton addressed back to the requester.
    pub fn reply_to(req: &JoinReqPayload, message_type: MessageType) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            sender_id: req.receiver_id.clone(),
            receiver_id: req.sender_id.clone(),
            transaction_id: req.transaction_id,
            message_type,
            result: AnswerResult {
                result_code: ResultCode::Success,
                description: String::new(),
            },
            phy_payload: None,
            nwk_s_key: None,
            f_nwk_s_int_key: None,
            s_nwk_s_int_key: None,
            nwk_s_enc_key: None,
            app_s_key: None,
        }
    }

    pub fn failure(
        req: &JoinReqPayload,
        message_type: MessageType,
        code: ResultCode,
        description: impl Into<String>,
    ) -> Self {
        let mut ans = Self::reply_to(req, message_type);
        ans.result = AnswerResult {
            result_code: code,
            description: description.into(),
        };
        ans
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(b))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.trim()).map_err(de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match b {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) if !s.trim().is_empty() => hex::decode(s.trim()).map(Some).map_err(de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_is_dispatched_on_message_type() {
        let body = r#"{
            "ProtocolVersion": "1.0",
            "SenderID": "010203",
            "ReceiverID": "0807060504030201",
            "TransactionID": 1234,
            "MessageType": "JoinReq",
            "MACVersion": "1.0.2",
            "PHYPayload": "00010203",
            "DevEUI": "0102030405060708",
            "DevAddr": "01020304",
            "DLSettings": "15",
            "RxDelay": 1,
            "CFList": ""
        }"#;
        let req: BackendRequest = serde_json::from_str(body).unwrap();
        let BackendRequest::JoinReq(req) = req else {
            panic!("expected a join-request");
        };
        assert_eq!(req.transaction_id, 1234);
        assert_eq!(req.dl_settings, vec![0x15]);
        assert_eq!(req.phy_payload, vec![0, 1, 2, 3]);
        assert_eq!(req.cf_list, None);
        assert_eq!(req.dev_addr.to_string(), "01020304");
    }

    #[test]
    fn failure_answer_omits_keys() {
        let req = JoinReqPayload {
            protocol_version: PROTOCOL_VERSION.into(),
            sender_id: "010203".into(),
            receiver_id: "0807060504030201".into(),
            transaction_id: 7,
            mac_version: "1.0.2".into(),
            phy_payload: vec![],
            dev_eui: EUI64::default(),
            dev_addr: DevAddr::default(),
            dl_settings: vec![0],
            rx_delay: 1,
            cf_list: None,
        };
        let ans = JoinAnsPayload::failure(&req, MessageType::JoinAns, ResultCode::MICFailed, "invalid mic");
        let v = serde_json::to_value(&ans).unwrap();
        assert_eq!(v["Result"]["ResultCode"], "MICFailed");
        assert_eq!(v["SenderID"], "0807060504030201");
        assert_eq!(v["ReceiverID"], "010203");
        assert_eq!(v["MessageType"], "JoinAns");
        assert!(v.get("PHYPayload").is_none());
        assert!(v.get("AppSKey").is_none());
    }
}
