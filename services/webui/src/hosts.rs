//! `/api/hosts`: discover the adapter fleet and return real host names.
//!
//! The control plane lists the devices carrying the adapter tag; any
//! adapter the directory has not seen yet is asked for its `/status` so we
//! can learn `Self.HostName`. Devices that fail to resolve are simply
//! absent from the result and retried on the next call.

use crate::WebUiState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use http::Method;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info};
use ts_core::RequestTrace;
use ts_proto::{KnownPath, ADAPTER_TAG, OUTGOING_REQUEST_TIMEOUT};

#[derive(Debug, Serialize)]
pub struct HostsResponse {
    pub hosts: Vec<String>,
}

pub async fn hosts(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    let devices = match state.control.devices_with_tag(ADAPTER_TAG).await {
        Ok(devices) => devices,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to list devices");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let deadline = Instant::now() + OUTGOING_REQUEST_TIMEOUT;
    let mut tasks = Vec::new();

    for device in devices {
        if !device.online {
            info!(trace_id = %trace.trace_id, adapter = %device.hostname, "offline device ignored, issue logging out?");
            continue;
        }
        if state.directory.host_for(&device.hostname).await.is_some() {
            continue;
        }

        let state = state.clone();
        let trace = trace.clone();
        tasks.push(tokio::spawn(async move {
            let status_path = KnownPath::Status.adapter();
            let call = state.client.call_adapter(
                &trace,
                Method::POST,
                &device.hostname,
                &status_path,
                None,
            );
            let response = match tokio::time::timeout_at(deadline, call).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
                    return;
                }
                Err(elapsed) => {
                    error!(trace_id = %trace.trace_id, error = %elapsed, "failed to call adapter");
                    return;
                }
            };

            let status: Value = match serde_json::from_slice(&response.body) {
                Ok(status) => status,
                Err(e) => {
                    error!(trace_id = %trace.trace_id, error = %e, "failed to decode hosts response from adapter");
                    return;
                }
            };
            let Some(host) = status.pointer("/Self/HostName").and_then(Value::as_str) else {
                error!(trace_id = %trace.trace_id, "unable to determine hostname from status response");
                return;
            };

            state.directory.store(host, &device.hostname).await;
        }));
    }

    // Every task is bounded by the outgoing deadline, so this join is too.
    for task in tasks {
        let _ = task.await;
    }

    Json(HostsResponse {
        hosts: state.directory.hosts().await,
    })
    .into_response()
}
