use std::sync::Arc;

use cicd_hooks::api::app_router;
use cicd_hooks::config::{DEFAULT_BIND_ADDRESS, DEFAULT_CONFIG_PATH};
use cicd_hooks::logging::init_logging;
use cicd_hooks::{AppState, load_config};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path =
        std::env::var("CICD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Loaded {} pipeline(s), restrict_pr={}, chain_pr={}",
        config.pipelines.len(),
        config.webhooks.restrict_pr,
        config.webhooks.chain_pr
    );

    let state = Arc::new(AppState::new(config, &config_path));
    let app = app_router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}
