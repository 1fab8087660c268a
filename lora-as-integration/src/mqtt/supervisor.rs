use super::{connect_mqtt_client, MqttConfig};
use crate::{
    events::DataDownPayload,
    retry::build_exponential_backoff,
    template::TopicTemplate,
};
use arc_swap::ArcSwapOption;
use backoff::backoff::Backoff;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, Publish};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection state shared between the supervisor and the publish path.
pub(super) struct ClientEntry {
    /// Set once the broker acknowledged the connection.
    pub client: ArcSwapOption<AsyncClient>,
    pub healthy: AtomicBool,
    pub shutdown: AtomicBool,
    pub last_error: std::sync::Mutex<Option<String>>,
}

impl ClientEntry {
    #[inline]
    pub fn new_empty() -> Self {
        Self {
            client: ArcSwapOption::from(None),
            healthy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            last_error: std::sync::Mutex::new(None),
        }
    }

    #[inline]
    pub fn update_error(&self, error: &str) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(error.to_owned());
        }
    }

    #[inline]
    pub fn clear_error(&self) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = None;
        }
    }

    #[inline]
    fn disconnected(&self) {
        self.client.store(None);
        self.healthy.store(false, Ordering::Release);
    }
}

pub(super) type SharedClient = Arc<ClientEntry>;

/// Owns the MQTT connection: connects, subscribes to the command topic,
/// forwards downlink commands and reconnects with exponential back-off.
pub(super) struct MqttSupervisor {
    config: Arc<MqttConfig>,
    command_topic: TopicTemplate,
    cancel: CancellationToken,
    downlink_tx: mpsc::Sender<DataDownPayload>,
    shared_client: SharedClient,
}

impl MqttSupervisor {
    pub fn new(
        config: Arc<MqttConfig>,
        command_topic: TopicTemplate,
        cancel: CancellationToken,
        downlink_tx: mpsc::Sender<DataDownPayload>,
        shared_client: SharedClient,
    ) -> Self {
        Self {
            config,
            command_topic,
            cancel,
            downlink_tx,
            shared_client,
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
                        "MQTT supervisor exhausted retry attempts"
                    );
                    break;
                }

                attempt += 1;
                debug!(attempt, server = %self.config.server, "MQTT supervisor connecting");

                match connect_mqtt_client(&self.config) {
                    Ok((client, event_loop)) => {
                        if self.run_event_loop(client, event_loop).await {
                            bo.reset();
                            attempt = 0;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "Failed to create MQTT client");
                        self.shared_client.update_error(&e.to_string());
                    }
                }

                if self.cancel.is_cancelled() {
                    break;
                }

                if let Some(delay) = bo.next_backoff() {
                    debug!(delay_ms = delay.as_millis() as u64, "MQTT reconnect backoff");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            self.shared_client.disconnected();
            info!("MQTT supervisor loop terminated");
        });
    }

    /// Drives the event loop until disconnection or cancellation. Returns
    /// `true` when the broker accepted the connection.
    async fn run_event_loop(&self, client: AsyncClient, mut event_loop: EventLoop) -> bool {
        let mut seen_active = false;
        let filter = self.command_topic.filter("+");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shared_client.disconnected();
                    let _ = client.disconnect().await;
                    break;
                }
                result = event_loop.poll() => match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(server = %self.config.server, "MQTT connection established");
                        seen_active = true;
                        self.shared_client.client.store(Some(Arc::new(client.clone())));
                        self.shared_client.healthy.store(true, Ordering::Release);
                        self.shared_client.clear_error();

                        // the request is queued and sent by the event loop
                        if let Err(e) = client.try_subscribe(filter.as_str(), self.config.qos()) {
                            warn!(error = %e, topic = %filter, "Failed to subscribe to command topic");
                            self.shared_client.update_error(&e.to_string());
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => self.handle_command(&p).await,
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!("MQTT server sent disconnect");
                        self.shared_client.disconnected();
                        self.shared_client.update_error("server sent disconnect");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT event loop error");
                        self.shared_client.disconnected();
                        self.shared_client.update_error(&e.to_string());
                        break;
                    }
                }
            }
        }

        seen_active
    }

    async fn handle_command(&self, p: &Publish) {
        let Some((application_id, dev_eui)) = self.command_topic.extract(&p.topic, '/') else {
            warn!(topic = %p.topic, "Ignoring message on unexpected topic");
            return;
        };

        match DataDownPayload::from_message(application_id, dev_eui, &p.payload) {
            Ok(pl) => {
                if self.downlink_tx.send(pl).await.is_err() {
                    warn!("Downlink channel closed, dropping MQTT command");
                }
            }
            Err(e) => {
                warn!(topic = %p.topic, error = %e, "Failed to decode MQTT downlink command");
            }
        }
    }
}
