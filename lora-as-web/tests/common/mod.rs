use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    web::Data,
    App, Error,
};
use lora_as_core::JoinServer;
use lora_as_models::settings::JoinServer as JoinServerSettings;
use lora_as_storage::{Migrator, MigratorTrait};
use lora_as_web::{api, AppState};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;

/// App wired like the production server, on an empty migrated database.
pub async fn app() -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.expect("connect sqlite");
    Migrator::up(&db, None).await.expect("migrate");

    let join_server = Arc::new(JoinServer::new(db, JoinServerSettings::default()));
    App::new()
        .app_data(Data::new(AppState::new(join_server)))
        .app_data(api::json_config())
        .configure(api::configure_routes)
}
