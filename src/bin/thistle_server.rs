//! thistle-server: broker-to-store bridge with an HTTP API
//!
//! ## Configuration
//! - `--config <path>` or THISTLE_CONFIG: YAML configuration file
//! - THISTLE__<SECTION>__<KEY>: overrides for individual values
//! - THISTLE_LOG: tracing filter directives
//!
//! Missing or invalid configuration aborts startup.

use std::sync::Arc;

use tracing::{error, info};

use thistle::broker::{MqttTransport, Transport};
use thistle::config::{Config, SharedConfig};
use thistle::http;
use thistle::runtime::Runtime;
use thistle::storage::init_storage;
use thistle::utils::bootstrap::{
    connect_with_retry, init_tracing, parse_config_path, shutdown_signal,
};

#[tokio::main]
async fn main() {
    let config_path = parse_config_path();
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Tracing is configured from the file that just failed to load.
            eprintln!("thistle-server: {}", e);
            std::process::exit(2);
        }
    };

    init_tracing(&config.logging);

    if let Err(e) = run(config).await {
        error!(error = %e, "thistle-server failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        storage = %config.storage.storage_type,
        "Starting thistle-server"
    );

    let store = connect_with_retry("store", || init_storage(&config.storage)).await?;
    info!("Storage initialized");

    let (transport, link) = MqttTransport::new(&config.broker);
    let transport: Box<dyn Transport> = Box::new(transport);
    let runtime = Runtime::start(&config, store, transport, Arc::new(link));

    let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;
    let app = http::router(runtime.app_state(SharedConfig::new(config)));

    // Open SSE streams only end once the broadcaster shuts down, so the runtime
    // stops before axum waits for connections to drain.
    http::serve(listener, app, async move {
        shutdown_signal().await;
        runtime.shutdown().await;
    })
    .await?;

    info!("thistle-server stopped");
    Ok(())
}
