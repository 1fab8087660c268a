use clap::Parser;
use lora_as_common::ASAppContext;
use lora_as_core::ASServer;
use lora_as_error::{ASError, ASResult};
use lora_as_models::constants::DEFAULT_CONFIG_FILE_NAME;
use lora_as_storage::{ASDbManager, ASEphemeralStore};
use lora_as_web::ASWebServer;
use std::{env::current_dir, path::PathBuf};

/// LoRaWAN application server
///
/// Runs the join-server API, the FUOTA scheduler, the application-layer
/// command reconcilers, gateway discovery and the integration fan-out.
#[derive(Parser)]
#[command(name = "lora-app-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LoRaWAN application server", long_about = None)]
struct Cli {
    /// Path of the TOML configuration file
    ///
    /// Defaults to 'lora-app-server.toml' in the current working directory.
    /// Every key can also be set through `LORA_AS__<SECTION>__<KEY>`.
    #[arg(short, long, env = "LORA_AS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ASResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => current_dir()
            .map_err(|e| ASError::from(format!("Failed to get current directory: {e}")))?
            .join(DEFAULT_CONFIG_FILE_NAME),
    };

    ASAppContext::init::<ASDbManager, ASEphemeralStore, ASServer, ASWebServer>(
        config_path.to_string_lossy().to_string(),
    )
    .await?;

    ASAppContext::instance().await?.run().await
}
