//! API module for all HTTP handlers

pub mod config;
pub mod handlers;
pub mod stats;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

// Re-export handlers
pub use config::{get_config, reload_config_endpoint};
pub use handlers::root;
pub use stats::{get_stats, status};
pub use webhook::handle_webhook;

pub fn app_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/status", routing::get(status))
        .route("/webhooks", routing::post(handle_webhook))
        .route("/api/stats", routing::get(get_stats))
        .route("/api/config/current", routing::get(get_config))
        .route("/api/reload", routing::post(reload_config_endpoint))
        .with_state(state)
}
