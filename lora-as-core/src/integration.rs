//! Event fan-out to the configured sinks and the downlink path back from
//! them.
use crate::{codec::CodecRunner, downlink::DownlinkDispatcher};
use dashmap::DashMap;
use futures::future::join_all;
use lora_as_error::{ASError, ASResult};
use lora_as_integration::{
    create_handler, DataDownPayload, Event, IntegrationHandler, IntegrationSettings, Marshaler,
};
use lora_as_models::{
    constants::{DOWNLINK_LOCK_KEY_PREFIX, MAX_APP_FPORT, MIN_APP_FPORT},
    settings::Integration,
    EphemeralStore,
};
use lora_as_repository::{DeviceProfileRepository, DeviceRepository, IntegrationRepository};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the merged downlink channel.
const DOWNLINK_CHANNEL_CAPACITY: usize = 1024;

type Handlers = Arc<Vec<Arc<dyn IntegrationHandler>>>;

/// Global sinks from the configuration plus per-application sinks built on
/// first use from the `integration` table.
pub struct IntegrationRegistry {
    db: DatabaseConnection,
    marshaler: Marshaler,
    global: Vec<Arc<dyn IntegrationHandler>>,
    per_app: DashMap<i32, Handlers>,
    downlink_tx: mpsc::Sender<DataDownPayload>,
    forwarders: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl IntegrationRegistry {
    /// Builds the global sinks. The returned receiver merges the downlink
    /// commands of every sink, global or per-application.
    pub async fn new(
        db: DatabaseConnection,
        settings: &Integration,
    ) -> ASResult<(Self, mpsc::Receiver<DataDownPayload>)> {
        let (downlink_tx, downlink_rx) = mpsc::channel(DOWNLINK_CHANNEL_CAPACITY);
        let registry = Self {
            db,
            marshaler: settings.marshaler,
            global: Vec::with_capacity(settings.global.len()),
            per_app: DashMap::new(),
            downlink_tx,
            forwarders: std::sync::Mutex::new(Vec::new()),
        };

        let mut global = Vec::with_capacity(settings.global.len());
        for s in &settings.global {
            let handler = create_handler(s, registry.marshaler).await?;
            registry.forward_downlinks(&handler).await;
            info!(kind = handler.kind(), "Global integration configured");
            global.push(handler);
        }

        Ok((Self { global, ..registry }, downlink_rx))
    }

    /// Sends the event to the global sinks and to the sinks of the
    /// application. Sink failures are logged, never returned.
    #[instrument(name = "integration-publish", skip_all, fields(application_id, event = %event.event_type()))]
    pub async fn publish(&self, application_id: i32, event: Event<'_>) {
        let app = match self.handlers_for(application_id).await {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "Failed to load application integrations");
                Arc::new(Vec::new())
            }
        };

        let handlers: Vec<&Arc<dyn IntegrationHandler>> =
            self.global.iter().chain(app.iter()).collect();
        let results = join_all(handlers.iter().map(|h| h.publish(event))).await;
        for (h, res) in handlers.iter().zip(results) {
            if let Err(e) = res {
                error!(kind = h.kind(), dev_eui = %event.dev_eui(), error = %e, "Publishing event failed");
            }
        }
    }

    /// Drops the cached sinks of an application so the next event rebuilds
    /// them from the database.
    pub async fn invalidate(&self, application_id: i32) {
        if let Some((_, handlers)) = self.per_app.remove(&application_id) {
            close_all(&handlers).await;
        }
    }

    pub async fn close(&self) {
        close_all(&self.global).await;
        let apps: Vec<i32> = self.per_app.iter().map(|e| *e.key()).collect();
        for id in apps {
            self.invalidate(id).await;
        }
        if let Ok(mut forwarders) = self.forwarders.lock() {
            for h in forwarders.drain(..) {
                h.abort();
            }
        }
    }

    async fn handlers_for(&self, application_id: i32) -> ASResult<Handlers> {
        if let Some(h) = self.per_app.get(&application_id) {
            return Ok(h.clone());
        }

        let rows = IntegrationRepository::find_by_application(application_id, &self.db).await?;
        let mut built = Vec::with_capacity(rows.len());
        for row in rows {
            let settings = match IntegrationSettings::from_row(&row.kind, row.settings) {
                Ok(s) => s,
                Err(e) => {
                    warn!(integration_id = row.id, kind = %row.kind, error = %e, "Invalid integration settings, skipped");
                    continue;
                }
            };
            match create_handler(&settings, self.marshaler).await {
                Ok(h) => {
                    self.forward_downlinks(&h).await;
                    built.push(h);
                }
                Err(e) => {
                    error!(integration_id = row.id, kind = settings.kind(), error = %e, "Failed to create integration");
                }
            }
        }
        let built: Handlers = Arc::new(built);

        let entry = self
            .per_app
            .entry(application_id)
            .or_insert_with(|| built.clone())
            .clone();
        if !Arc::ptr_eq(&entry, &built) {
            close_all(&built).await;
        }
        Ok(entry)
    }

    async fn forward_downlinks(&self, handler: &Arc<dyn IntegrationHandler>) {
        let Some(mut rx) = handler.take_downlink_receiver().await else {
            return;
        };
        let tx = self.downlink_tx.clone();
        let kind = handler.kind();
        let task = tokio::spawn(async move {
            while let Some(pl) = rx.recv().await {
                if tx.send(pl).await.is_err() {
                    break;
                }
            }
            debug!(kind, "Integration downlink channel closed");
        });
        if let Ok(mut forwarders) = self.forwarders.lock() {
            forwarders.push(task);
        }
    }
}

async fn close_all(handlers: &[Arc<dyn IntegrationHandler>]) {
    for h in handlers {
        if let Err(e) = h.close().await {
            warn!(kind = h.kind(), error = %e, "Failed to close integration");
        }
    }
}

/// Turns downlink commands received from integrations into queue items.
pub struct DownlinkIngest {
    db: DatabaseConnection,
    store: Arc<dyn EphemeralStore>,
    dispatcher: Arc<DownlinkDispatcher>,
    codec: Arc<CodecRunner>,
    lock_ttl: Duration,
}

impl DownlinkIngest {
    pub fn new(
        db: DatabaseConnection,
        store: Arc<dyn EphemeralStore>,
        dispatcher: Arc<DownlinkDispatcher>,
        codec: Arc<CodecRunner>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            db,
            store,
            dispatcher,
            codec,
            lock_ttl,
        }
    }

    /// Enqueues the payload and returns its FCnt. Returns `None` when another
    /// instance already handles the same command.
    #[instrument(name = "integration-downlink", skip_all, fields(dev_eui = %pl.dev_eui, f_port = pl.f_port))]
    pub async fn handle(&self, pl: DataDownPayload) -> ASResult<Option<u32>> {
        if !(MIN_APP_FPORT..=MAX_APP_FPORT).contains(&pl.f_port) {
            return Err(ASError::Validation(format!(
                "FPort must be between {MIN_APP_FPORT} and {MAX_APP_FPORT}, got {}",
                pl.f_port
            )));
        }

        let lock_key = format!(
            "{DOWNLINK_LOCK_KEY_PREFIX}:{}:{}:{}",
            pl.application_id, pl.dev_eui, pl.reference
        );
        if !self
            .store
            .set_nx_ex(&lock_key, Vec::new(), self.lock_ttl)
            .await?
        {
            debug!(reference = %pl.reference, "Downlink already handled by another instance");
            return Ok(None);
        }

        let device = DeviceRepository::find_by_dev_eui(pl.dev_eui.as_bytes(), &self.db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device {}", pl.dev_eui)))?;
        if i64::from(device.application_id) != pl.application_id {
            return Err(ASError::Validation(format!(
                "device {} does not belong to application {}",
                pl.dev_eui, pl.application_id
            )));
        }

        let data = match (pl.data, pl.object) {
            (Some(data), _) => data,
            (None, Some(object)) => {
                let profile = DeviceProfileRepository::find_by_id(device.device_profile_id, &self.db)
                    .await?
                    .ok_or_else(|| {
                        ASError::NotFound(format!("device-profile {}", device.device_profile_id))
                    })?;
                self.codec
                    .encode(&profile, pl.f_port, &device.variables.0, &object)
                    .await?
            }
            (None, None) => Vec::new(),
        };

        let f_cnt = self
            .dispatcher
            .enqueue(pl.dev_eui, pl.confirmed, pl.f_port, &data)
            .await?;
        info!(f_cnt, confirmed = pl.confirmed, "Downlink from integration enqueued");
        Ok(Some(f_cnt))
    }
}
