//! Webhook delivery endpoint

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::SharedState;
use crate::error::CicdError;
use crate::scm::HookParser;

fn error_response(error: &CicdError) -> Response {
    (
        error.status_code(),
        Json(json!({
            "error": error.to_string()
        })),
    )
        .into_response()
}

/// POST /webhooks - Handles a source-control delivery.
///
/// `201` events created, `200` pull request closed, `204` nothing to do,
/// `400` unparseable, `401` bad signature, `413` too large, `429` rate
/// limited, `5xx` adapter or factory failure.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.stats.record_received();
    let response = process_delivery(&state, &headers, &body).await;
    state.stats.record(response.status());
    response
}

async fn process_delivery(state: &SharedState, headers: &HeaderMap, body: &Bytes) -> Response {
    let (max_bytes, rate_limit) = {
        let config = state.config.read().unwrap();
        (config.webhooks.max_bytes, config.rate_limit.clone())
    };

    if body.len() > max_bytes {
        warn!("Rejected delivery of {} bytes (limit {})", body.len(), max_bytes);
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({
                "error": format!("Payload exceeds {} bytes", max_bytes)
            })),
        )
            .into_response();
    }

    let hook = match state.hook_parser().parse_hook(headers, body) {
        Ok(Some(hook)) => hook,
        Ok(None) => return StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!("Rejected delivery: {}", e);
            return error_response(&e);
        }
    };

    let repo = hook.repo_identity();
    {
        let mut rate_limiter = state.rate_limiter.lock().await;
        if rate_limiter.check_rate_limit(&repo, rate_limit.max_requests, rate_limit.window_secs) {
            warn!(
                "Too many deliveries for {} - {} per {} seconds",
                repo, rate_limit.max_requests, rate_limit.window_secs
            );
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    info!(
        hook_id = %hook.hook_id,
        "Received {} {} delivery for {}",
        hook.action,
        if hook.is_pull_request() { "pr" } else { "repo" },
        repo
    );

    let policy = state.delivery_policy();
    match state.processor.process(hook, &policy).await {
        Ok(outcome) if outcome.status == StatusCode::NO_CONTENT => {
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(outcome) => (outcome.status, Json(outcome)).into_response(),
        Err(e) => {
            error!("Delivery failed: {}", e);
            error_response(&e)
        }
    }
}
