//! jrcpd - JRCP reader/terminal protocol server
//!
//! A TCP server exposing a controller with a built-in demo card device.

use jrcp_core::Controller;
use jrcp_protocol::PROTOCOL_VERSION;
use jrcp_server::demo::install_demo_device;
use jrcp_server::{Config, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if JRCP_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("JRCP_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("JRCP_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting jrcpd");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Controller: {}", config.controller.name);
    tracing::info!(
        "  Demo device: {:#04x} ({})",
        config.controller.demo_device_nad,
        config.controller.demo_device_description
    );

    // Build the controller and install the demo card device
    let mut controller = Controller::new(&config.controller.name, PROTOCOL_VERSION)?;
    install_demo_device(
        &mut controller,
        config.controller.demo_device_nad,
        &config.controller.demo_device_description,
    )?;

    let server_config = ServerConfig::from_network(&config.network);
    let server = Arc::new(Server::new(server_config, controller));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
