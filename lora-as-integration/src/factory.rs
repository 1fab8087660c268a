use crate::{
    amqp::AmqpIntegration, aws_sns::AwsSnsIntegration,
    azure_service_bus::AzureServiceBusIntegration, config::IntegrationSettings,
    error::IntegrationResult, gcp_pub_sub::GcpPubSubIntegration, http::HttpIntegration,
    influxdb::InfluxDbIntegration, kafka::KafkaIntegration, marshaler::Marshaler,
    mqtt::MqttIntegration, postgresql::PostgresqlIntegration, IntegrationHandler,
};
use std::sync::Arc;

/// Builds the sink described by `settings`. Long-lived clients are started
/// here and keep reconnecting in the background.
pub async fn create_handler(
    settings: &IntegrationSettings,
    marshaler: Marshaler,
) -> IntegrationResult<Arc<dyn IntegrationHandler>> {
    let handler: Arc<dyn IntegrationHandler> = match settings.clone() {
        IntegrationSettings::Mqtt(c) => Arc::new(MqttIntegration::new(c, marshaler)?),
        IntegrationSettings::Amqp(c) => Arc::new(AmqpIntegration::new(c, marshaler)?),
        IntegrationSettings::AwsSns(c) => Arc::new(AwsSnsIntegration::new(c, marshaler).await?),
        IntegrationSettings::AzureServiceBus(c) => {
            Arc::new(AzureServiceBusIntegration::new(c, marshaler)?)
        }
        IntegrationSettings::GcpPubSub(c) => Arc::new(GcpPubSubIntegration::new(c, marshaler)?),
        IntegrationSettings::Kafka(c) => Arc::new(KafkaIntegration::new(c, marshaler)?),
        IntegrationSettings::Postgresql(c) => Arc::new(PostgresqlIntegration::new(c).await?),
        IntegrationSettings::Http(c) => Arc::new(HttpIntegration::new(c, marshaler)?),
        IntegrationSettings::Influxdb(c) => Arc::new(InfluxDbIntegration::new(c)?),
    };
    Ok(handler)
}
