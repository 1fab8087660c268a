use lora_as_error::ASResult;
use lora_as_models::settings::Database as DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::{info, instrument, log::LevelFilter};

/// Opens the connection pool described by `config`.
#[instrument(name = "init_db", skip_all)]
pub async fn init_db(config: &DatabaseConfig) -> ASResult<DatabaseConnection> {
    let mut opts = ConnectOptions::new(config.dsn.as_str());
    opts.connect_timeout(Duration::from_millis(config.connect_timeout))
        .idle_timeout(Duration::from_millis(config.idle_timeout))
        .max_connections(config.max_open_connections.max(1))
        .min_connections(config.min_idle_connections);

    #[cfg(debug_assertions)]
    {
        opts.sqlx_logging(true).sqlx_logging_level(LevelFilter::Debug);
    }
    #[cfg(not(debug_assertions))]
    {
        opts.sqlx_logging(false).sqlx_logging_level(LevelFilter::Off);
    }

    info!(sqlite = config.is_sqlite(), "Connecting to database");
    let db = Database::connect(opts).await?;
    info!("Successfully connected to database");
    Ok(db)
}
