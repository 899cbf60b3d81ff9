//! Ping a peer through the daemon, `count` times with `delay` between.

use crate::AdapterState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::Value;
use tracing::{error, info};
use ts_core::RequestTrace;
use ts_proto::{parse_duration, PingInput};

pub async fn ping(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
    body: Bytes,
) -> Response {
    let input: PingInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to decode ping input");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let delay = match parse_duration(&input.delay) {
        Ok(delay) => delay,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to parse ping delay");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let Some(ip) = state.known_peers.ip_by_peer(&input.target).await else {
        error!(trace_id = %trace.trace_id, target = %input.target, "failed to get known IP for host");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut all_pings: Vec<Value> = Vec::new();
    for _ in 0..input.count {
        match state.local.ping(ip, &input.ping_type).await {
            Ok(result) => {
                tokio::time::sleep(delay).await;
                all_pings.push(result);
            }
            Err(e) => {
                info!(trace_id = %trace.trace_id, error = %e, "failed to ping");
            }
        }
    }

    Json(all_pings).into_response()
}
