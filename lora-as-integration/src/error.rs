use lora_as_error::ASError;
use thiserror::Error;

pub type IntegrationResult<T, E = IntegrationError> = Result<T, E>;

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The long-lived client is not (yet) connected.
    #[error("{0} client is not connected")]
    NotConnected(&'static str),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("marshal error: {0}")]
    Marshal(String),
    #[error("invalid downlink: {0}")]
    InvalidDownlink(String),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("{0}")]
    Amqp(#[from] lapin::Error),
    #[error("{0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("{0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<IntegrationError> for ASError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::Configuration(m) | IntegrationError::InvalidDownlink(m) => {
                ASError::Validation(m)
            }
            e @ (IntegrationError::NotConnected(_)
            | IntegrationError::Publish(_)
            | IntegrationError::Http(_)
            | IntegrationError::Kafka(_)
            | IntegrationError::Amqp(_)
            | IntegrationError::Mqtt(_)) => ASError::TransientRemote(e.to_string()),
            e => ASError::Integration(e.to_string()),
        }
    }
}
