//! MQTT sink: events are published on a per-event topic, downlink commands
//! are received on the command topic.
mod supervisor;

use crate::{
    error::{IntegrationError, IntegrationResult},
    events::{DataDownPayload, Event, EventType},
    marshaler::Marshaler,
    retry::RetryPolicy,
    template::TopicTemplate,
    IntegrationHandler,
};
use async_trait::async_trait;
use reqwest::Url;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, TlsConfiguration, Transport};
use serde::{Deserialize, Serialize};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use supervisor::{ClientEntry, MqttSupervisor, SharedClient};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, `tcp://host:1883` or `ssl://host:8883`.
    #[serde(default = "MqttConfig::server_default")]
    pub server: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "MqttConfig::clean_session_default")]
    pub clean_session: bool,
    /// Random when empty.
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "MqttConfig::keep_alive_secs_default")]
    pub keep_alive_secs: u64,
    #[serde(default = "MqttConfig::event_topic_template_default")]
    pub event_topic_template: String,
    #[serde(default = "MqttConfig::command_topic_template_default")]
    pub command_topic_template: String,
    /// Events published with the retain flag set.
    #[serde(default)]
    pub retain_events: Vec<EventType>,
    /// CA certificate file (PEM).
    #[serde(default)]
    pub ca_cert: String,
    /// Client certificate file (PEM), for mutual TLS.
    #[serde(default)]
    pub tls_cert: String,
    /// Client key file (PEM), for mutual TLS.
    #[serde(default)]
    pub tls_key: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: Self::server_default(),
            username: String::new(),
            password: String::new(),
            qos: 0,
            clean_session: Self::clean_session_default(),
            client_id: String::new(),
            keep_alive_secs: Self::keep_alive_secs_default(),
            event_topic_template: Self::event_topic_template_default(),
            command_topic_template: Self::command_topic_template_default(),
            retain_events: Vec::new(),
            ca_cert: String::new(),
            tls_cert: String::new(),
            tls_key: String::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl MqttConfig {
    fn server_default() -> String {
        "tcp://localhost:1883".into()
    }

    fn clean_session_default() -> bool {
        true
    }

    fn keep_alive_secs_default() -> u64 {
        30
    }

    fn event_topic_template_default() -> String {
        "application/{{ApplicationID}}/device/{{DevEUI}}/event/{{EventType}}".into()
    }

    fn command_topic_template_default() -> String {
        "application/{{ApplicationID}}/device/{{DevEUI}}/command/down".into()
    }

    pub(crate) fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

pub struct MqttIntegration {
    config: Arc<MqttConfig>,
    marshaler: Marshaler,
    event_topic: TopicTemplate,
    shared_client: SharedClient,
    downlink_rx: Mutex<Option<mpsc::Receiver<DataDownPayload>>>,
    cancel: CancellationToken,
}

impl MqttIntegration {
    /// Validates the configuration and spawns the connection supervisor.
    pub fn new(config: MqttConfig, marshaler: Marshaler) -> IntegrationResult<Self> {
        let event_topic = TopicTemplate::new(&config.event_topic_template)?;
        let command_topic = TopicTemplate::new(&config.command_topic_template)?;
        // fail fast on a bad URL or unreadable certificates
        build_mqtt_options(&config)?;

        let config = Arc::new(config);
        let shared_client = Arc::new(ClientEntry::new_empty());
        let (downlink_tx, downlink_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();

        MqttSupervisor::new(
            Arc::clone(&config),
            command_topic,
            cancel.child_token(),
            downlink_tx,
            Arc::clone(&shared_client),
        )
        .run();

        info!(server = %config.server, "MQTT integration started");
        Ok(Self {
            config,
            marshaler,
            event_topic,
            shared_client,
            downlink_rx: Mutex::new(Some(downlink_rx)),
            cancel,
        })
    }
}

#[async_trait]
impl IntegrationHandler for MqttIntegration {
    fn kind(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let client = self
            .shared_client
            .client
            .load_full()
            .ok_or(IntegrationError::NotConnected("mqtt"))?;
        let topic = self.event_topic.render(
            event.application_id(),
            &event.dev_eui(),
            Some(event.event_type()),
        );
        let payload = self.marshaler.marshal(event)?;
        let retain = self.config.retain_events.contains(&event.event_type());
        client
            .publish(topic, self.config.qos(), retain, payload)
            .await?;
        Ok(())
    }

    async fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DataDownPayload>> {
        self.downlink_rx.lock().await.take()
    }

    async fn close(&self) -> IntegrationResult<()> {
        self.shared_client.shutdown.store(true, Ordering::Release);
        self.cancel.cancel();
        Ok(())
    }
}

/// Creates the client and its event loop; the connection itself is
/// established by polling the event loop.
pub(crate) fn connect_mqtt_client(
    config: &MqttConfig,
) -> IntegrationResult<(AsyncClient, EventLoop)> {
    let options = build_mqtt_options(config)?;
    Ok(AsyncClient::new(options, 100))
}

fn build_mqtt_options(config: &MqttConfig) -> IntegrationResult<MqttOptions> {
    let url = Url::parse(&config.server).map_err(|e| {
        IntegrationError::Configuration(format!("invalid MQTT server '{}': {e}", config.server))
    })?;
    let tls = matches!(url.scheme(), "ssl" | "tls" | "mqtts");
    let host = url
        .host_str()
        .ok_or_else(|| IntegrationError::Configuration("MQTT server without host".into()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let client_id = if config.client_id.is_empty() {
        let short = Uuid::new_v4().simple().to_string();
        format!("lora-as-{}", &short[..8])
    } else {
        config.client_id.clone()
    };

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(config.clean_session);
    if !config.username.is_empty() {
        options.set_credentials(&config.username, &config.password);
    }

    if tls || !config.ca_cert.is_empty() {
        let transport = if config.ca_cert.is_empty() {
            Transport::tls_with_default_config()
        } else {
            let ca = std::fs::read(&config.ca_cert)?;
            let client_auth = if config.tls_cert.is_empty() || config.tls_key.is_empty() {
                None
            } else {
                Some((std::fs::read(&config.tls_cert)?, std::fs::read(&config.tls_key)?))
            };
            Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            })
        };
        options.set_transport(transport);
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_topics() {
        let c: MqttConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, MqttConfig::default());
        assert_eq!(c.qos(), QoS::AtMostOnce);
        assert!(c.event_topic_template.ends_with("/event/{{EventType}}"));
    }

    #[test]
    fn plain_server_url_is_accepted() {
        let c = MqttConfig {
            server: "tcp://broker.local:1884".into(),
            username: "u".into(),
            ..Default::default()
        };
        let opts = build_mqtt_options(&c).unwrap();
        assert_eq!(opts.broker_address(), ("broker.local".to_string(), 1884));
    }

    #[test]
    fn bad_server_url_is_rejected() {
        let c = MqttConfig {
            server: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_mqtt_options(&c),
            Err(IntegrationError::Configuration(_))
        ));
    }
}
