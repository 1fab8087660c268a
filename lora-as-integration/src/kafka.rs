//! Kafka sink. Every event goes to one topic, keyed per device, with the
//! event name in the `event` header.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::Event,
    marshaler::Marshaler,
    template::TopicTemplate,
    IntegrationHandler,
};
use async_trait::async_trait;
use rdkafka::{
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    ClientConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    #[serde(default = "KafkaConfig::brokers_default")]
    pub brokers: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "KafkaConfig::topic_default")]
    pub topic: String,
    #[serde(default = "KafkaConfig::event_key_template_default")]
    pub event_key_template: String,
    /// SASL/PLAIN credentials, used when `username` is set.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "KafkaConfig::message_timeout_ms_default")]
    pub message_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Self::brokers_default(),
            tls: false,
            topic: Self::topic_default(),
            event_key_template: Self::event_key_template_default(),
            username: String::new(),
            password: String::new(),
            message_timeout_ms: Self::message_timeout_ms_default(),
        }
    }
}

impl KafkaConfig {
    fn brokers_default() -> String {
        "localhost:9092".into()
    }

    fn topic_default() -> String {
        "chirpstack_as".into()
    }

    fn event_key_template_default() -> String {
        "application.{{ApplicationID}}.device.{{DevEUI}}.event.{{EventType}}".into()
    }

    fn message_timeout_ms_default() -> u64 {
        5_000
    }

    fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", self.brokers.as_str());
        cfg.set("client.id", "lora-app-server");
        cfg.set("message.timeout.ms", self.message_timeout_ms.to_string());

        let protocol = match (self.tls, self.username.is_empty()) {
            (false, true) => "PLAINTEXT",
            (true, true) => "SSL",
            (false, false) => "SASL_PLAINTEXT",
            (true, false) => "SASL_SSL",
        };
        cfg.set("security.protocol", protocol);
        if !self.username.is_empty() {
            cfg.set("sasl.mechanisms", "PLAIN");
            cfg.set("sasl.username", self.username.as_str());
            cfg.set("sasl.password", self.password.as_str());
        }
        cfg
    }
}

pub struct KafkaIntegration {
    config: KafkaConfig,
    marshaler: Marshaler,
    event_key: TopicTemplate,
    producer: FutureProducer,
}

impl KafkaIntegration {
    /// librdkafka connects lazily and reconnects on its own, so creating the
    /// producer does not contact the brokers.
    pub fn new(config: KafkaConfig, marshaler: Marshaler) -> IntegrationResult<Self> {
        if config.topic.is_empty() {
            return Err(IntegrationError::Configuration("kafka topic is empty".into()));
        }
        let event_key = TopicTemplate::new(&config.event_key_template)?;
        let producer: FutureProducer = config.client_config().create()?;
        info!(brokers = %config.brokers, topic = %config.topic, "Kafka integration started");
        Ok(Self {
            config,
            marshaler,
            event_key,
            producer,
        })
    }
}

#[async_trait]
impl IntegrationHandler for KafkaIntegration {
    fn kind(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let event_type = event.event_type();
        let key = self
            .event_key
            .render(event.application_id(), &event.dev_eui(), Some(event_type));
        let payload = self.marshaler.marshal(event)?;
        let headers = OwnedHeaders::new().insert(Header {
            key: "event",
            value: Some(event_type.as_str()),
        });

        let record = FutureRecord::to(&self.config.topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);
        self.producer
            .send(
                record,
                Duration::from_millis(self.config.message_timeout_ms),
            )
            .await
            .map_err(|(e, _msg)| IntegrationError::Kafka(e))?;
        debug!(key = %key, event = %event_type, "Kafka event published");
        Ok(())
    }

    async fn close(&self) -> IntegrationResult<()> {
        self.producer
            .flush(Duration::from_millis(self.config.message_timeout_ms))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_protocol_follows_tls_and_credentials() {
        let c = KafkaConfig {
            tls: true,
            username: "user".into(),
            password: "secret".into(),
            ..Default::default()
        };
        let cfg = c.client_config();
        assert_eq!(cfg.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(cfg.get("sasl.username"), Some("user"));

        let cfg = KafkaConfig::default().client_config();
        assert_eq!(cfg.get("security.protocol"), Some("PLAINTEXT"));
        assert_eq!(cfg.get("sasl.username"), None);
    }
}
