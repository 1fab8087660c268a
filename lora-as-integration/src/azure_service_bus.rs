//! Azure Service-Bus sink, publishing through the REST endpoint with a
//! SAS token derived from the connection string.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::Event,
    marshaler::Marshaler,
    IntegrationHandler,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use reqwest::{header::CONTENT_TYPE, Client};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::info;

const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureServiceBusConfig {
    /// `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`
    pub connection_string: String,
    /// Queue or topic name.
    pub publish_name: String,
    #[serde(default = "AzureServiceBusConfig::timeout_ms_default")]
    pub timeout_ms: u64,
}

impl AzureServiceBusConfig {
    fn timeout_ms_default() -> u64 {
        5_000
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ConnectionString {
    /// `https://<namespace>.servicebus.windows.net/`
    endpoint: String,
    key_name: String,
    key: String,
}

impl ConnectionString {
    fn parse(s: &str) -> IntegrationResult<Self> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        for part in s.split(';').filter(|p| !p.is_empty()) {
            let Some((k, v)) = part.split_once('=') else {
                continue;
            };
            match k {
                "Endpoint" => endpoint = Some(v.replacen("sb://", "https://", 1)),
                "SharedAccessKeyName" => key_name = Some(v.to_string()),
                "SharedAccessKey" => key = Some(v.to_string()),
                _ => {}
            }
        }

        let missing = |name: &str| {
            IntegrationError::Configuration(format!("connection string misses {name}"))
        };
        let mut endpoint = endpoint.ok_or_else(|| missing("Endpoint"))?;
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            endpoint,
            key_name: key_name.ok_or_else(|| missing("SharedAccessKeyName"))?,
            key: key.ok_or_else(|| missing("SharedAccessKey"))?,
        })
    }

    fn sas_token(&self, uri: &str, expiry: i64) -> IntegrationResult<String> {
        let encoded_uri = urlencoding::encode(uri);
        let to_sign = format!("{encoded_uri}\n{expiry}");
        let mut mac = Hmac::<Sha256>::new_from_slice(self.key.as_bytes())
            .map_err(|e| IntegrationError::Configuration(e.to_string()))?;
        mac.update(to_sign.as_bytes());
        let sig = STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!(
            "SharedAccessSignature sr={encoded_uri}&sig={}&se={expiry}&skn={}",
            urlencoding::encode(&sig),
            self.key_name
        ))
    }
}

pub struct AzureServiceBusIntegration {
    client: Client,
    connection: ConnectionString,
    uri: String,
    marshaler: Marshaler,
}

impl AzureServiceBusIntegration {
    pub fn new(config: AzureServiceBusConfig, marshaler: Marshaler) -> IntegrationResult<Self> {
        let connection = ConnectionString::parse(&config.connection_string)?;
        if config.publish_name.is_empty() {
            return Err(IntegrationError::Configuration(
                "azure_service_bus publish_name is empty".into(),
            ));
        }
        let uri = format!("{}{}", connection.endpoint, config.publish_name);
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        info!(uri = %uri, "Azure Service-Bus integration started");
        Ok(Self {
            client,
            connection,
            uri,
            marshaler,
        })
    }
}

#[async_trait]
impl IntegrationHandler for AzureServiceBusIntegration {
    fn kind(&self) -> &'static str {
        "azure_service_bus"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let expiry = chrono::Utc::now().timestamp() + TOKEN_TTL_SECS;
        let token = self.connection.sas_token(&self.uri, expiry)?;
        let event_type = event.event_type();
        let dev_eui = event.dev_eui();
        let application_id = event.application_id();
        let body = self.marshaler.marshal(event)?;

        // custom properties are JSON values
        let resp = self
            .client
            .post(format!("{}/messages", self.uri))
            .header(reqwest::header::AUTHORIZATION, token)
            .header(CONTENT_TYPE, self.marshaler.content_type())
            .header("event", format!("\"{event_type}\""))
            .header("application_id", format!("\"{application_id}\""))
            .header("dev_eui", format!("\"{dev_eui}\""))
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IntegrationError::Publish(format!(
                "azure service-bus returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN: &str = "Endpoint=sb://lora.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=c2VjcmV0";

    #[test]
    fn parses_connection_string() {
        let c = ConnectionString::parse(CONN).unwrap();
        assert_eq!(c.endpoint, "https://lora.servicebus.windows.net/");
        assert_eq!(c.key_name, "send");
        assert_eq!(c.key, "c2VjcmV0");
    }

    #[test]
    fn rejects_incomplete_connection_string() {
        assert!(matches!(
            ConnectionString::parse("Endpoint=sb://lora.servicebus.windows.net/"),
            Err(IntegrationError::Configuration(_))
        ));
    }

    #[test]
    fn sas_token_layout() {
        let c = ConnectionString::parse(CONN).unwrap();
        let token = c
            .sas_token("https://lora.servicebus.windows.net/events", 1_600_000_000)
            .unwrap();
        assert!(token.starts_with(
            "SharedAccessSignature sr=https%3A%2F%2Flora.servicebus.windows.net%2Fevents&sig="
        ));
        assert!(token.ends_with("&se=1600000000&skn=send"));
    }
}
