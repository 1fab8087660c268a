//! Process-wide application context: settings, logger and the long-lived
//! components, brought up in dependency order and torn down on a signal.
mod logger;

pub use logger::Logger;

use lora_as_error::{ASError, ASResult};
use lora_as_models::{
    settings::Settings, ApplicationServer, DbManager, EphemeralStore, WebServer,
};
use once_cell::sync::OnceCell;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
#[cfg(windows)]
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, instrument, span, warn, Level};

static APP_CONTEXT: OnceCell<RwLock<ASAppContext>> = OnceCell::new();

pub struct ASAppContext {
    settings: Settings,
    logger: Logger,
    db_manager: Option<Arc<dyn DbManager>>,
    store: Option<Arc<dyn EphemeralStore>>,
    application_server: Option<Arc<dyn ApplicationServer>>,
    web_server: Option<Arc<dyn WebServer>>,
    /// Flag to prevent duplicate shutdowns
    shutting_down: AtomicBool,
    shutdown_token: CancellationToken,
}

impl ASAppContext {
    #[inline]
    pub async fn instance() -> ASResult<RwLockReadGuard<'static, ASAppContext>> {
        match APP_CONTEXT.get() {
            Some(ctx) => Ok(ctx.read().await),
            None => Err(ASError::from("ASAppContext is not initialized")),
        }
    }

    /// Loads the settings, installs the logger and brings up every
    /// component. Fails on the first component that cannot start.
    pub async fn init<D, S, A, W>(config: String) -> ASResult<()>
    where
        D: DbManager + 'static,
        S: EphemeralStore + 'static,
        A: ApplicationServer + 'static,
        W: WebServer + 'static,
    {
        let settings = Settings::new(config)?;
        let mut logger = Logger::new(Logger::parse_level(&settings.general.log_level)?);
        logger.initialize(&settings.general.log_dir)?;

        let span = span!(Level::INFO, "init-app");
        let _guard = span.enter();

        let mut ctx = ASAppContext {
            settings,
            logger,
            db_manager: None,
            store: None,
            application_server: None,
            web_server: None,
            shutting_down: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
        };

        ctx.db_manager = Some(D::init(&ctx.settings).await?);
        info!("Database initialized successfully.");

        ctx.store = Some(S::init(&ctx.settings).await?);
        info!("Ephemeral store initialized successfully.");

        ctx.application_server =
            Some(A::init(&ctx.settings, ctx.db_manager()?, ctx.store()?).await?);
        info!("Application server initialized successfully.");

        ctx.web_server = Some(W::init(&ctx.settings, ctx.application_server()?).await?);
        info!("Join-server API initialized successfully.");

        APP_CONTEXT
            .set(RwLock::new(ctx))
            .map_err(|_| ASError::from("Failed to set ASAppContext"))?;
        Ok(())
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub fn db_manager(&self) -> ASResult<Arc<dyn DbManager>> {
        self.db_manager
            .as_ref()
            .ok_or(ASError::from("Database manager not initialized"))
            .map(Arc::clone)
    }

    #[inline]
    pub fn store(&self) -> ASResult<Arc<dyn EphemeralStore>> {
        self.store
            .as_ref()
            .ok_or(ASError::from("Ephemeral store not initialized"))
            .map(Arc::clone)
    }

    #[inline]
    pub fn application_server(&self) -> ASResult<Arc<dyn ApplicationServer>> {
        self.application_server
            .as_ref()
            .ok_or(ASError::from("Application server not initialized"))
            .map(Arc::clone)
    }

    #[inline]
    pub fn change_log_level(&self, level: Level) {
        self.logger.set_level(level);
    }

    /// Starts the background loops and blocks until a shutdown signal (or
    /// [`ASAppContext::shutdown`]) arrives, then tears everything down.
    pub async fn run(&self) -> ASResult<()> {
        self.application_server()?.start().await?;
        info!("Application server started");
        self.listen_for_shutdown(async { self.graceful_shutdown().await })
            .await
    }

    /// Requests a shutdown without a signal.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    async fn listen_for_shutdown<F>(&self, shutdown_fn: F) -> ASResult<()>
    where
        F: Future<Output = ASResult<()>>,
    {
        let shutdown_token = self.shutdown_token.clone();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sighup = signal(SignalKind::hangup())?;
            let mut sigquit = signal(SignalKind::quit())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM signal"),
                _ = sigint.recv() => info!("Received SIGINT signal"),
                _ = sighup.recv() => info!("Received SIGHUP signal"),
                _ = sigquit.recv() => info!("Received SIGQUIT signal"),
                _ = shutdown_token.cancelled() => {}
            }
        }

        #[cfg(windows)]
        {
            tokio::select! {
                _ = ctrl_c() => info!("Received ctrl-c signal"),
                _ = shutdown_token.cancelled() => {}
            }
        }

        shutdown_fn.await
    }

    /// Stops the API and the loops first, the database last.
    #[instrument(name = "graceful-shutdown", skip_all)]
    pub async fn graceful_shutdown(&self) -> ASResult<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Starting graceful shutdown...");

        let tracker = TaskTracker::new();
        if let Some(web_server) = &self.web_server {
            let web_server = Arc::clone(web_server);
            tracker.spawn(async move {
                if let Err(e) = web_server.stop().await {
                    warn!(error = %e, "Stopping join-server API failed");
                }
            });
        }
        if let Some(server) = &self.application_server {
            let server = Arc::clone(server);
            tracker.spawn(async move {
                if let Err(e) = server.stop().await {
                    warn!(error = %e, "Stopping application server failed");
                }
            });
        }
        tracker.close();
        tracker.wait().await;

        if let Some(store) = &self.store {
            store.close().await?;
        }
        if let Some(db_manager) = &self.db_manager {
            db_manager.close().await?;
        }

        info!("Graceful shutdown completed");
        Ok(())
    }
}
