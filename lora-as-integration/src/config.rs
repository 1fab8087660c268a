use crate::{
    amqp::AmqpConfig, aws_sns::AwsSnsConfig, azure_service_bus::AzureServiceBusConfig,
    gcp_pub_sub::GcpPubSubConfig, http::HttpConfig, influxdb::InfluxDbConfig, kafka::KafkaConfig,
    mqtt::MqttConfig, postgresql::PostgresqlConfig,
};
use serde::{Deserialize, Serialize};

/// Configuration of one sink, tagged by `kind`. Used both for the global
/// sinks of the configuration file and for per-application rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrationSettings {
    Mqtt(MqttConfig),
    Amqp(AmqpConfig),
    AwsSns(AwsSnsConfig),
    AzureServiceBus(AzureServiceBusConfig),
    GcpPubSub(GcpPubSubConfig),
    Kafka(KafkaConfig),
    Postgresql(PostgresqlConfig),
    Http(HttpConfig),
    Influxdb(InfluxDbConfig),
}

impl IntegrationSettings {
    pub fn kind(&self) -> &'static str {
        match self {
            IntegrationSettings::Mqtt(_) => "mqtt",
            IntegrationSettings::Amqp(_) => "amqp",
            IntegrationSettings::AwsSns(_) => "aws_sns",
            IntegrationSettings::AzureServiceBus(_) => "azure_service_bus",
            IntegrationSettings::GcpPubSub(_) => "gcp_pub_sub",
            IntegrationSettings::Kafka(_) => "kafka",
            IntegrationSettings::Postgresql(_) => "postgresql",
            IntegrationSettings::Http(_) => "http",
            IntegrationSettings::Influxdb(_) => "influxdb",
        }
    }

    /// Builds the tagged value from an `integration` row (`kind` column plus
    /// the JSON settings blob).
    pub fn from_row(kind: &str, settings: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut obj = match settings {
            serde_json::Value::Object(obj) => obj,
            serde_json::Value::Null => serde_json::Map::new(),
            other => return serde_json::from_value(other),
        };
        obj.insert("kind".into(), serde_json::Value::String(kind.to_owned()));
        serde_json::from_value(serde_json::Value::Object(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_kind_selects_variant() {
        let s = IntegrationSettings::from_row(
            "http",
            json!({ "event_endpoint_url": "http://localhost:8080/events" }),
        )
        .unwrap();
        assert_eq!(s.kind(), "http");
        match s {
            IntegrationSettings::Http(c) => {
                assert_eq!(c.event_endpoint_url, "http://localhost:8080/events")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(IntegrationSettings::from_row("carrier_pigeon", json!({})).is_err());
    }

    #[test]
    fn empty_settings_use_defaults() {
        let s = IntegrationSettings::from_row("mqtt", serde_json::Value::Null).unwrap();
        assert_eq!(s, IntegrationSettings::Mqtt(MqttConfig::default()));
    }
}
