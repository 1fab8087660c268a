use crate::{
    applayer::{ClockSync, FragmentationSession, McClassCSession, MulticastSetup, Reconciler},
    codec::CodecRunner,
    downlink::DownlinkDispatcher,
    fuota::FuotaScheduler,
    gwping::GatewayPinger,
    integration::{DownlinkIngest, IntegrationRegistry},
    joinserver::JoinServer,
    metrics::MetricsStore,
    nsclient::{HttpNsClientPool, NsClientPool},
    service::{ApplicationServerService, ServiceComponents},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Future;
use lora_as_error::{init::InitContextError, ASResult};
use lora_as_integration::DataDownPayload;
use lora_as_models::{settings::Settings, ApplicationServer, DbManager, EphemeralStore};
use lora_as_repository::{FuotaDeploymentRepository, MulticastGroupRepository};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
    time::{interval, sleep, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Grace period granted to each background task on shutdown.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct ASServer {
    join_server: Arc<JoinServer>,
    service: Arc<ApplicationServerService>,
    fuota: Arc<FuotaScheduler>,
    clock_sync: Arc<ClockSync>,
    multicast_setup: Arc<Reconciler<MulticastSetup>>,
    fragmentation: Arc<Reconciler<FragmentationSession>>,
    class_c_session: Arc<Reconciler<McClassCSession>>,
    pinger: Arc<GatewayPinger>,
    ingest: Arc<DownlinkIngest>,
    integrations: Arc<IntegrationRegistry>,
    /// Merged downlink commands of every integration, taken on start.
    downlink_rx: Mutex<Option<mpsc::Receiver<DataDownPayload>>>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl ASServer {
    #[inline]
    pub fn join_server(&self) -> &Arc<JoinServer> {
        &self.join_server
    }

    #[inline]
    pub fn service(&self) -> &Arc<ApplicationServerService> {
        &self.service
    }

    #[inline]
    pub fn fuota(&self) -> &Arc<FuotaScheduler> {
        &self.fuota
    }

    #[inline]
    pub fn clock_sync(&self) -> &Arc<ClockSync> {
        &self.clock_sync
    }

    /// Builds every component on top of an already migrated database and a
    /// connected ephemeral store, with a caller supplied NS client pool.
    pub async fn build(
        settings: &Settings,
        db: DatabaseConnection,
        store: Arc<dyn EphemeralStore>,
        ns: Arc<dyn NsClientPool>,
    ) -> ASResult<Arc<Self>> {
        let as_settings = &settings.application_server;

        let dispatcher = Arc::new(DownlinkDispatcher::new(db.clone(), Arc::clone(&ns)));
        let codec = Arc::new(CodecRunner::new(&as_settings.codec));
        let metrics = Arc::new(MetricsStore::new(Arc::clone(&store), &as_settings.metrics));
        let (integrations, downlink_rx) =
            IntegrationRegistry::new(db.clone(), &as_settings.integration).await?;
        let integrations = Arc::new(integrations);

        let ms_sync = as_settings.remote_multicast_setup.clone();
        let frag_sync = as_settings.fragmentation_session.clone();
        let multicast_setup = Arc::new(Reconciler::new(
            db.clone(),
            MulticastSetup::new(Arc::clone(&dispatcher), ms_sync.fport),
            ms_sync.clone(),
        ));
        let class_c_session = Arc::new(Reconciler::new(
            db.clone(),
            McClassCSession::new(Arc::clone(&dispatcher), ms_sync.fport),
            ms_sync.clone(),
        ));
        let fragmentation = Arc::new(Reconciler::new(
            db.clone(),
            FragmentationSession::new(Arc::clone(&dispatcher), frag_sync.fport),
            frag_sync.clone(),
        ));
        let clock_sync = Arc::new(ClockSync::new(
            Arc::clone(&dispatcher),
            as_settings.clock_sync.fport,
        ));

        let fuota = Arc::new(FuotaScheduler::new(
            db.clone(),
            Arc::clone(&ns),
            Arc::clone(&dispatcher),
            as_settings.fuota_deployment.clone(),
            ms_sync,
            frag_sync,
        ));
        let pinger = Arc::new(GatewayPinger::new(
            db.clone(),
            Arc::clone(&store),
            Arc::clone(&ns),
            Duration::from_millis(as_settings.gateway_discovery.interval),
            Duration::from_millis(as_settings.gateway_discovery.lookup_ttl),
        ));
        let ingest = Arc::new(DownlinkIngest::new(
            db.clone(),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&codec),
            Duration::from_millis(as_settings.downlink.lock_ttl),
        ));

        let service = Arc::new(ApplicationServerService::new(ServiceComponents {
            db: db.clone(),
            ns,
            integrations: Arc::clone(&integrations),
            metrics,
            codec,
            multicast_setup: Arc::clone(&multicast_setup),
            fragmentation: Arc::clone(&fragmentation),
            clock_sync: Arc::clone(&clock_sync),
            pinger: Arc::clone(&pinger),
        }));
        let join_server = Arc::new(JoinServer::new(db, settings.join_server.clone()));

        Ok(Arc::new(Self {
            join_server,
            service,
            fuota,
            clock_sync,
            multicast_setup,
            fragmentation,
            class_c_session,
            pinger,
            ingest,
            integrations,
            downlink_rx: Mutex::new(Some(downlink_rx)),
            tasks: RwLock::new(Vec::new()),
            shutdown_token: CancellationToken::new(),
        }))
    }

    /// Runs `tick` every `period` until shutdown. Errors are logged and the
    /// loop continues.
    fn spawn_periodic<F, Fut, T>(&self, name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut(DateTime<Utc>) -> Fut + Send + 'static,
        Fut: Future<Output = ASResult<T>> + Send,
        T: Send,
    {
        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            let mut interval = interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("✅ {name} loop started, interval {period:?}");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = tick(Utc::now()).await {
                            error!(task = name, error = %e, "Background tick failed");
                        }
                    }
                }
            }
            info!("🛑 {name} loop stopped");
        })
    }

    async fn start_downlink_consumer(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.downlink_rx.lock().await.take()?;
        let ingest = Arc::clone(&self.ingest);
        let token = self.shutdown_token.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        break;
                    }
                    pl = rx.recv() => {
                        let Some(pl) = pl else {
                            break;
                        };
                        if let Err(e) = ingest.handle(pl).await {
                            error!(error = %e, "Failed to handle integration downlink");
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl ApplicationServer for ASServer {
    #[instrument(name = "as-init", skip_all)]
    async fn init(
        settings: &Settings,
        db_manager: Arc<dyn DbManager>,
        store: Arc<dyn EphemeralStore>,
    ) -> ASResult<Arc<Self>, InitContextError> {
        let db = db_manager.get_connection().map_err(|e| {
            InitContextError::Primitive(format!("Failed to get database connection: {e}"))
        })?;

        validate_multicast_groups(&db).await?;

        let ns: Arc<dyn NsClientPool> = Arc::new(HttpNsClientPool::new(Duration::from_millis(
            settings.network_server.request_timeout,
        )));
        let server = Self::build(settings, db, store, ns).await.map_err(|e| {
            InitContextError::Primitive(format!("Failed to build application server: {e}"))
        })?;

        info!("Application server initialization completed");
        Ok(server)
    }

    #[instrument(name = "as-start", skip_all)]
    async fn start(&self) -> ASResult<()> {
        let mut tasks = Vec::with_capacity(7);

        let r = Arc::clone(&self.multicast_setup);
        tasks.push(self.spawn_periodic("multicast-setup", r.interval(), move |now| {
            let r = Arc::clone(&r);
            async move { r.tick(now).await }
        }));
        let r = Arc::clone(&self.class_c_session);
        tasks.push(self.spawn_periodic("multicast-session", r.interval(), move |now| {
            let r = Arc::clone(&r);
            async move { r.tick(now).await }
        }));
        let r = Arc::clone(&self.fragmentation);
        tasks.push(self.spawn_periodic("fragmentation-session", r.interval(), move |now| {
            let r = Arc::clone(&r);
            async move { r.tick(now).await }
        }));
        let fuota = Arc::clone(&self.fuota);
        tasks.push(self.spawn_periodic("fuota-deployment", fuota.interval(), move |now| {
            let fuota = Arc::clone(&fuota);
            async move { fuota.tick(now).await }
        }));
        let pinger = Arc::clone(&self.pinger);
        tasks.push(self.spawn_periodic("gateway-ping", pinger.interval(), move |now| {
            let pinger = Arc::clone(&pinger);
            async move { pinger.tick(now).await }
        }));
        if let Some(handle) = self.start_downlink_consumer().await {
            tasks.push(handle);
        }

        self.tasks.write().await.extend(tasks);
        info!("Application server started");
        Ok(())
    }

    #[instrument(name = "as-stop", skip_all)]
    async fn stop(&self) -> ASResult<()> {
        if self.shutdown_token.is_cancelled() {
            warn!("Application server is already stopped");
            return Ok(());
        }
        self.shutdown_token.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.write().await.drain(..).collect();
        for mut handle in handles {
            tokio::select! {
                _ = &mut handle => {}
                _ = sleep(TASK_SHUTDOWN_GRACE) => {
                    handle.abort();
                }
            }
        }

        self.integrations.close().await;
        info!("Application server stopped");
        Ok(())
    }
}

/// Multicast groups must only hold devices of their own application, and
/// must not be empty unless a FUOTA deployment is still populating them.
async fn validate_multicast_groups(db: &DatabaseConnection) -> ASResult<(), InitContextError> {
    let ids = MulticastGroupRepository::find_all_ids(db)
        .await
        .map_err(|e| InitContextError::Primitive(format!("Failed to list multicast groups: {e}")))?;

    for id in ids {
        let Some(group) = MulticastGroupRepository::find_by_id(id, db)
            .await
            .map_err(|e| InitContextError::Primitive(format!("Failed to load multicast group {id}: {e}")))?
        else {
            continue;
        };

        let foreign = MulticastGroupRepository::count_foreign_devices(&group, db)
            .await
            .map_err(|e| InitContextError::Primitive(format!("Failed to check multicast group {id}: {e}")))?;
        if foreign > 0 {
            return Err(InitContextError::Primitive(format!(
                "multicast group {id} contains {foreign} device(s) of another application"
            )));
        }

        let members = MulticastGroupRepository::count_devices(id, db)
            .await
            .map_err(|e| InitContextError::Primitive(format!("Failed to check multicast group {id}: {e}")))?;
        if members == 0 {
            let deployments = FuotaDeploymentRepository::count_for_multicast_group(id, db)
                .await
                .map_err(|e| {
                    InitContextError::Primitive(format!("Failed to check multicast group {id}: {e}"))
                })?;
            if deployments == 0 {
                return Err(InitContextError::Primitive(format!(
                    "multicast group {id} has no devices"
                )));
            }
        }
    }
    Ok(())
}
