use super::AmqpConfig;
use crate::{
    events::DataDownPayload, retry::build_exponential_backoff, template::TopicTemplate,
};
use arc_swap::ArcSwapOption;
use backoff::backoff::Backoff;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) struct ChannelEntry {
    /// Publish channel, present while the connection is up.
    pub channel: ArcSwapOption<Channel>,
}

impl ChannelEntry {
    pub fn new_empty() -> Self {
        Self {
            channel: ArcSwapOption::from(None),
        }
    }
}

/// Keeps one AMQP connection alive, with a publish channel and a consumer
/// on the downlink queue.
pub(super) struct AmqpSupervisor {
    config: Arc<AmqpConfig>,
    command_routing_key: TopicTemplate,
    cancel: CancellationToken,
    downlink_tx: mpsc::Sender<DataDownPayload>,
    entry: Arc<ChannelEntry>,
}

impl AmqpSupervisor {
    pub fn new(
        config: Arc<AmqpConfig>,
        command_routing_key: TopicTemplate,
        cancel: CancellationToken,
        downlink_tx: mpsc::Sender<DataDownPayload>,
        entry: Arc<ChannelEntry>,
    ) -> Self {
        Self {
            config,
            command_routing_key,
            cancel,
            downlink_tx,
            entry,
        }
    }

    pub fn run(self) {
        tokio::spawn(async move {
            let retry_policy = self.config.retry;
            let mut bo = build_exponential_backoff(&retry_policy);
            let mut attempt: u32 = 0;

            loop {
                if self.cancel.is_cancelled() {
                    break;
                }
                if !retry_policy.should_retry(attempt) {
                    warn!(
                        max_attempts = ?retry_policy.max_attempts,
                        "AMQP supervisor exhausted retry attempts"
                    );
                    break;
                }
                attempt += 1;

                match self.connect().await {
                    Ok((conn, consumer)) => {
                        info!(exchange = %self.config.exchange, "AMQP connection established");
                        bo.reset();
                        attempt = 0;
                        self.consume(consumer).await;
                        self.entry.channel.store(None);
                        let _ = conn.close(200, "closing").await;
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "AMQP connect failed");
                    }
                }

                if self.cancel.is_cancelled() {
                    break;
                }
                if let Some(delay) = bo.next_backoff() {
                    debug!(delay_ms = delay.as_millis() as u64, "AMQP reconnect backoff");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            self.entry.channel.store(None);
            info!("AMQP supervisor loop terminated");
        });
    }

    async fn connect(&self) -> Result<(Connection, Consumer), lapin::Error> {
        let conn = Connection::connect(&self.config.url, ConnectionProperties::default()).await?;

        let publish = conn.create_channel().await?;
        let consume = conn.create_channel().await?;
        consume
            .queue_declare(
                &self.config.downlink_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        consume
            .queue_bind(
                &self.config.downlink_queue,
                &self.config.exchange,
                &self.command_routing_key.filter("*"),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let consumer = consume
            .basic_consume(
                &self.config.downlink_queue,
                "lora-app-server",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        self.entry.channel.store(Some(Arc::new(publish)));
        Ok((conn, consumer))
    }

    /// Returns when the consumer stream ends or the supervisor is cancelled.
    async fn consume(&self, mut consumer: Consumer) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "AMQP consumer error");
                        break;
                    }
                    None => {
                        warn!("AMQP consumer stream closed");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let routing_key = delivery.routing_key.as_str();
        match self.command_routing_key.extract(routing_key, '.') {
            Some((application_id, dev_eui)) => {
                match DataDownPayload::from_message(application_id, dev_eui, &delivery.data) {
                    Ok(pl) => {
                        if self.downlink_tx.send(pl).await.is_err() {
                            warn!("Downlink channel closed, dropping AMQP command");
                        }
                    }
                    Err(e) => {
                        warn!(routing_key, error = %e, "Failed to decode AMQP downlink command")
                    }
                }
            }
            None => warn!(routing_key, "Ignoring message with unexpected routing key"),
        }

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            warn!(error = %e, "Failed to ack AMQP delivery");
        }
    }
}
