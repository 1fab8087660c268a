//! AWS SNS sink.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::Event,
    marshaler::Marshaler,
    IntegrationHandler,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns::{
    config::{Credentials, Region},
    types::MessageAttributeValue,
    Client,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsSnsConfig {
    pub aws_region: String,
    /// Static credentials. When empty the default provider chain is used.
    #[serde(default)]
    pub aws_access_key_id: String,
    #[serde(default)]
    pub aws_secret_access_key: String,
    pub topic_arn: String,
}

pub struct AwsSnsIntegration {
    client: Client,
    topic_arn: String,
    marshaler: Marshaler,
}

impl AwsSnsIntegration {
    pub async fn new(config: AwsSnsConfig, marshaler: Marshaler) -> IntegrationResult<Self> {
        if config.topic_arn.is_empty() || config.aws_region.is_empty() {
            return Err(IntegrationError::Configuration(
                "aws_sns requires topic_arn and aws_region".into(),
            ));
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.aws_region));
        if !config.aws_access_key_id.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.aws_access_key_id,
                config.aws_secret_access_key,
                None,
                None,
                "lora-app-server",
            ));
        }
        let sdk_config = loader.load().await;

        info!(topic_arn = %config.topic_arn, "AWS SNS integration started");
        Ok(Self {
            client: Client::new(&sdk_config),
            topic_arn: config.topic_arn,
            marshaler,
        })
    }
}

fn string_attribute(value: String) -> IntegrationResult<MessageAttributeValue> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| IntegrationError::Publish(e.to_string()))
}

/// SNS messages are text, binary marshalers are sent base64 encoded.
fn message_body(marshaler: Marshaler, payload: Vec<u8>) -> IntegrationResult<String> {
    match marshaler {
        Marshaler::Protobuf => Ok(STANDARD.encode(payload)),
        Marshaler::Json | Marshaler::JsonV3 => {
            String::from_utf8(payload).map_err(|e| IntegrationError::Marshal(e.to_string()))
        }
    }
}

#[async_trait]
impl IntegrationHandler for AwsSnsIntegration {
    fn kind(&self) -> &'static str {
        "aws_sns"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let event_type = event.event_type();
        let dev_eui = event.dev_eui();
        let application_id = event.application_id();
        let message = message_body(self.marshaler, self.marshaler.marshal(event)?)?;

        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(message)
            .message_attributes("event", string_attribute(event_type.to_string())?)
            .message_attributes("dev_eui", string_attribute(dev_eui)?)
            .message_attributes("application_id", string_attribute(application_id.to_string())?)
            .send()
            .await
            .map_err(|e| IntegrationError::Publish(format!("aws sns: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protobuf_payloads_are_base64_encoded() {
        assert_eq!(
            message_body(Marshaler::Protobuf, vec![0x0a, 0x01, 0xff]).unwrap(),
            "CgH/"
        );
        assert_eq!(
            message_body(Marshaler::Json, b"{\"a\":1}".to_vec()).unwrap(),
            "{\"a\":1}"
        );
    }
}
