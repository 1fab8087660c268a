//! HTTP endpoint of the join-server (LoRaWAN Backend Interfaces JSON).
pub mod api;

use actix_web::{
    dev::{Server, ServerHandle},
    middleware::{Logger, NormalizePath},
    web::Data,
    App, HttpServer,
};
use async_trait::async_trait;
use lora_as_core::{ASServer, JoinServer};
use lora_as_error::{init::InitContextError, ASError, ASResult};
use lora_as_models::{settings::Settings, ApplicationServer, WebServer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    join_server: Arc<JoinServer>,
}

impl AppState {
    pub fn new(join_server: Arc<JoinServer>) -> Self {
        Self { join_server }
    }
}

#[derive(Clone)]
pub struct ASWebServer {
    /// Server handle for graceful shutdown
    server: Arc<Mutex<Option<ServerHandle>>>,
}

impl ASWebServer {
    fn create_server(bind: &str, join_server: Arc<JoinServer>) -> ASResult<Server> {
        let state = AppState::new(join_server);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(Data::new(state.clone()))
                .app_data(api::json_config())
                .wrap(Logger::default())
                .wrap(NormalizePath::trim())
                .configure(api::configure_routes)
        })
        .bind(bind)
        .map_err(|e| ASError::from(format!("Failed to bind join-server API to {bind}: {e}")))?;

        Ok(server.run())
    }
}

#[async_trait]
impl WebServer for ASWebServer {
    #[instrument(name = "init-web-server", skip_all)]
    async fn init(
        settings: &Settings,
        server: Arc<dyn ApplicationServer>,
    ) -> ASResult<Arc<Self>, InitContextError> {
        let server = server.downcast_arc::<ASServer>().map_err(|_| {
            InitContextError::TypeMismatch("application server is not an ASServer".into())
        })?;
        let bind = settings.join_server.bind.clone();
        let http = Self::create_server(&bind, Arc::clone(server.join_server())).map_err(|e| {
            InitContextError::Primitive(format!("Failed to create web server: {e}"))
        })?;
        let handle = http.handle();

        tokio::spawn(async move {
            if let Err(e) = http.await {
                error!(error = %e, "Join-server API stopped with an error");
            }
        });
        info!(bind = %bind, "Join-server API listening");

        Ok(Arc::new(ASWebServer {
            server: Arc::new(Mutex::new(Some(handle))),
        }))
    }

    #[instrument(name = "web-server-stop", skip_all)]
    async fn stop(&self) -> ASResult<()> {
        if let Some(handle) = self.server.lock().await.take() {
            handle.stop(true).await;
        }
        info!("Join-server API stopped");
        Ok(())
    }
}
