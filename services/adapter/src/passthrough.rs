//! Unary daemon passthrough handlers.
//!
//! Most of the adapter surface is a straight relay: call the daemon, hand
//! the dynamic JSON back. `/status` additionally feeds the peer registry.

use crate::AdapterState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::Value;
use tracing::error;
use ts_core::RequestTrace;
use ts_proto::PprofInput;

pub async fn status(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    match state.local.status().await {
        Ok(status) => {
            state.known_peers.store_status(&status).await;
            Json(status).into_response()
        }
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to get status");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn prefs(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    relay(state.local.prefs().await, &trace, "failed to get prefs")
}

pub async fn drive_shares(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    relay(
        state.local.drive_shares().await,
        &trace,
        "failed to get driveshares",
    )
}

pub async fn dns_config(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    relay(
        state.local.dns_os_config().await,
        &trace,
        "failed to get dnsconfig",
    )
}

pub async fn serve_config(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    relay(
        state.local.serve_config().await,
        &trace,
        "failed to get serveconfig",
    )
}

pub async fn app_conn_routes(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    relay(
        state.local.app_conn_routes().await,
        &trace,
        "failed to get appconnroutes",
    )
}

pub async fn pprof(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
    body: Bytes,
) -> Response {
    let input: PprofInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to decode pprof input");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.local.pprof(&input.profile_type, input.seconds).await {
        Ok(profile) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            profile,
        )
            .into_response(),
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed getting pprof");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn goroutines(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    match state.local.goroutines().await {
        Ok(dump) => ([(header::CONTENT_TYPE, "text/plain")], dump).into_response(),
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to dump goroutines");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn relay(
    result: Result<Value, ts_core::localapi::LocalApiError>,
    trace: &RequestTrace,
    context: &str,
) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "{}", context);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
