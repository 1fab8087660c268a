//! Payload codecs selected per device-profile.
pub mod cayenne;
pub mod js;

pub use cayenne::CayenneLpp;

use js::JsLimits;
use lora_as_error::{ASError, ASResult};
use lora_as_models::{
    entities::prelude::DeviceProfileModel, enums::common::PayloadCodec, settings::Codec,
};
use serde_json::Value;
use std::collections::HashMap;

/// Converts between raw FRMPayload bytes and JSON objects according to the
/// codec configured on the device-profile.
#[derive(Debug, Clone)]
pub struct CodecRunner {
    limits: JsLimits,
}

impl CodecRunner {
    pub fn new(settings: &Codec) -> Self {
        Self {
            limits: JsLimits::from(settings),
        }
    }

    /// Returns `None` when the profile has no codec.
    pub async fn decode(
        &self,
        profile: &DeviceProfileModel,
        f_port: u8,
        variables: &HashMap<String, String>,
        data: &[u8],
    ) -> ASResult<Option<Value>> {
        match profile.payload_codec {
            PayloadCodec::None => Ok(None),
            PayloadCodec::CayenneLpp => Ok(Some(serde_json::to_value(CayenneLpp::decode(data)?)?)),
            PayloadCodec::CustomJs => js::decode(
                self.limits,
                profile.payload_decoder_script.clone(),
                f_port,
                variables.clone(),
                data.to_vec(),
            )
            .await
            .map(Some),
        }
    }

    pub async fn encode(
        &self,
        profile: &DeviceProfileModel,
        f_port: u8,
        variables: &HashMap<String, String>,
        object: &Value,
    ) -> ASResult<Vec<u8>> {
        match profile.payload_codec {
            PayloadCodec::None => Err(ASError::Validation(format!(
                "device-profile '{}' has no payload codec configured",
                profile.name
            ))),
            PayloadCodec::CayenneLpp => {
                let lpp: CayenneLpp = serde_json::from_value(object.clone())
                    .map_err(|e| ASError::Codec(format!("invalid Cayenne LPP object: {e}")))?;
                Ok(lpp.encode())
            }
            PayloadCodec::CustomJs => {
                js::encode(
                    self.limits,
                    profile.payload_encoder_script.clone(),
                    f_port,
                    variables.clone(),
                    object.clone(),
                )
                .await
            }
        }
    }
}
