//! Chat Relay Server - Entry Point

use log::info;
use std::process::ExitCode;

use chat_relay_server::error::RelayError;
use chat_relay_server::error::handlers::handle_error;
use chat_relay_server::utils::logging::setup_logging;
use chat_relay_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    info!("Launching chat relay server...");

    match start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            handle_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn start() -> Result<(), RelayError> {
    let config = ServerConfig::load()?;
    let server = Server::bind(config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            shutdown.trigger();
        }
    });

    server.run().await
}
