//! Stats API endpoints

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json,
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;

use crate::SharedState;
use crate::db::StoreCounts;

const RECENT_EVENTS: usize = 10;

/// Delivery counters by outcome
#[derive(Debug, Default)]
pub struct DeliveryStats {
    received: AtomicU64,
    created: AtomicU64,
    closed: AtomicU64,
    no_action: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryStatsSnapshot {
    pub received: u64,
    pub created: u64,
    pub closed: u64,
    pub no_action: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a delivery under the status it was answered with
    pub fn record(&self, status: StatusCode) {
        let counter = match status {
            StatusCode::CREATED => &self.created,
            StatusCode::OK => &self.closed,
            StatusCode::NO_CONTENT => &self.no_action,
            s if s.is_client_error() => &self.rejected,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            no_action: self.no_action.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Server statistics
#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub configured_pipelines: usize,
}

/// Combined stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub server: ServerStats,
    pub deliveries: DeliveryStatsSnapshot,
    pub store: StoreCounts,
}

/// GET /api/stats - Server, delivery and store statistics
pub async fn get_stats(AxumState(state): AxumState<SharedState>) -> Json<StatsResponse> {
    // Read config without holding the lock across await
    let configured_pipelines = {
        let config = state.config.read().unwrap();
        config.pipelines.len()
    };

    let server = ServerStats {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
        configured_pipelines,
    };

    Json(StatsResponse {
        server,
        deliveries: state.stats.snapshot(),
        store: state.store.counts().await,
    })
}

/// GET /status - Server status with the most recent events
/// Supports `?pipeline=<id>` to only list events of one pipeline
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let pipeline = params.get("pipeline").and_then(|p| p.parse::<u64>().ok());

    let mut events = state.store.events().await;
    if let Some(id) = pipeline {
        events.retain(|e| e.pipeline_id() == id);
    }
    let recent: Vec<_> = events.into_iter().rev().take(RECENT_EVENTS).collect();
    let counts = state.store.counts().await;

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "events": {
            "recent": recent,
            "recent_count": recent.len(),
            "total": counts.events,
        },
        "builds": {
            "running": counts.running_builds,
        }
    }))
}
