//! Integration sinks of the application server.
//!
//! Every sink implements [`IntegrationHandler`]. Uplink, join, ack, error,
//! status and location events are published through one method, sinks that
//! receive downlink commands (MQTT, AMQP) hand out a receiver once.
pub mod amqp;
pub mod aws_sns;
pub mod azure_service_bus;
mod config;
mod error;
pub mod events;
mod factory;
pub mod gcp_pub_sub;
pub mod http;
pub mod influxdb;
pub mod kafka;
mod marshaler;
pub mod mqtt;
pub mod postgresql;
mod retry;
mod template;

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use tokio::sync::mpsc;

pub use config::IntegrationSettings;
pub use error::{IntegrationError, IntegrationResult};
pub use events::{
    AckEvent, DataDownPayload, ErrorEvent, Event, EventType, JoinEvent, Location, LocationEvent,
    RxInfo, StatusEvent, TxInfo, UplinkEvent,
};
pub use factory::create_handler;
pub use marshaler::Marshaler;
pub use retry::RetryPolicy;
pub use template::TopicTemplate;

#[async_trait]
pub trait IntegrationHandler: DowncastSync {
    /// Configuration tag of the sink, e.g. `mqtt`.
    fn kind(&self) -> &'static str;

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()>;

    async fn send_uplink(&self, pl: &UplinkEvent) -> IntegrationResult<()> {
        self.publish(Event::Up(pl)).await
    }

    async fn send_join(&self, pl: &JoinEvent) -> IntegrationResult<()> {
        self.publish(Event::Join(pl)).await
    }

    async fn send_ack(&self, pl: &AckEvent) -> IntegrationResult<()> {
        self.publish(Event::Ack(pl)).await
    }

    async fn send_error(&self, pl: &ErrorEvent) -> IntegrationResult<()> {
        self.publish(Event::Error(pl)).await
    }

    async fn send_status(&self, pl: &StatusEvent) -> IntegrationResult<()> {
        self.publish(Event::Status(pl)).await
    }

    async fn send_location(&self, pl: &LocationEvent) -> IntegrationResult<()> {
        self.publish(Event::Location(pl)).await
    }

    /// Downlink commands received by the sink. Returns `Some` at most once,
    /// sinks without a command channel always return `None`.
    async fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DataDownPayload>> {
        None
    }

    async fn close(&self) -> IntegrationResult<()> {
        Ok(())
    }
}

impl_downcast!(sync IntegrationHandler);
