//! GCP Pub/Sub sink using the REST publish endpoint.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::Event,
    marshaler::Marshaler,
    IntegrationHandler,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::info;

const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcpPubSubConfig {
    /// Service-account key file content (JSON).
    pub credentials_file: String,
    pub project_id: String,
    pub topic_name: String,
}

pub struct GcpPubSubIntegration {
    client: Client,
    service_account: CustomServiceAccount,
    url: String,
    marshaler: Marshaler,
}

impl GcpPubSubIntegration {
    pub fn new(config: GcpPubSubConfig, marshaler: Marshaler) -> IntegrationResult<Self> {
        if config.project_id.is_empty() || config.topic_name.is_empty() {
            return Err(IntegrationError::Configuration(
                "gcp_pub_sub requires project_id and topic_name".into(),
            ));
        }
        let service_account = CustomServiceAccount::from_json(&config.credentials_file)
            .map_err(|e| IntegrationError::Configuration(format!("gcp credentials: {e}")))?;
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        info!(project_id = %config.project_id, topic = %config.topic_name, "GCP Pub/Sub integration started");
        Ok(Self {
            client,
            service_account,
            url: publish_url(&config.project_id, &config.topic_name),
            marshaler,
        })
    }
}

fn publish_url(project_id: &str, topic_name: &str) -> String {
    format!("https://pubsub.googleapis.com/v1/projects/{project_id}/topics/{topic_name}:publish")
}

fn publish_body(event: &str, dev_eui: &str, application_id: u64, data: &[u8]) -> serde_json::Value {
    json!({
        "messages": [{
            "data": STANDARD.encode(data),
            "attributes": {
                "event": event,
                "devEUI": dev_eui,
                "applicationID": application_id.to_string(),
            },
        }]
    })
}

#[async_trait]
impl IntegrationHandler for GcpPubSubIntegration {
    fn kind(&self) -> &'static str {
        "gcp_pub_sub"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let token = self
            .service_account
            .token(&[PUBSUB_SCOPE])
            .await
            .map_err(|e| IntegrationError::Publish(format!("gcp token: {e}")))?;
        let body = publish_body(
            event.event_type().as_str(),
            &event.dev_eui(),
            event.application_id(),
            &self.marshaler.marshal(event)?,
        );

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IntegrationError::Publish(format!(
                "gcp pub/sub returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_attributes() {
        let body = publish_body("up", "0102030405060708", 7, &[1, 2, 3]);
        assert_eq!(
            publish_url("p", "t"),
            "https://pubsub.googleapis.com/v1/projects/p/topics/t:publish"
        );
        let msg = &body["messages"][0];
        assert_eq!(msg["data"], "AQID");
        assert_eq!(msg["attributes"]["event"], "up");
        assert_eq!(msg["attributes"]["devEUI"], "0102030405060708");
        assert_eq!(msg["attributes"]["applicationID"], "7");
    }
}
