use std::process::ExitCode;

use inkwell_collab::server::{ServerConfig, SyncServer};
use log::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting Inkwell sync server on {}...", config.bind_addr);
    match &config.content_root {
        Some(root) => info!("Serving initial content from {}", root.display()),
        None => info!("No content root configured, documents start empty"),
    }

    let server = SyncServer::new(config);
    if let Err(e) = server.run().await {
        error!("Server stopped: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
