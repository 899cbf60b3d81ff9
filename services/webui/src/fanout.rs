//! The unary multi-host dispatcher.
//!
//! Every fan-out handler follows the same lifecycle: decode the body, anchor
//! one deadline, spawn one task per target with a single-use result slot,
//! then collect the slots in input order. A target's failure lands in its
//! result slot; it never fails the request, and the response always has one
//! entry per requested target.

use crate::WebUiState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::error;
use ts_core::RequestTrace;
use ts_proto::{
    parse_duration, KnownPath, PingInput, PprofInput, QueryDnsInput, QueryDnsResult,
    OUTGOING_REQUEST_TIMEOUT,
};

#[derive(Debug, Deserialize)]
struct DefaultInput {
    hosts: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct DefaultResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

/// Result slots are single-use; a task writes exactly one message. If a task
/// dies without reporting (it should not), the slot still yields an entry so
/// the response length equals the request length.
async fn collect<T>(slots: Vec<(String, oneshot::Receiver<T>)>, lost: impl Fn(String) -> T) -> Vec<T> {
    let mut results = Vec::with_capacity(slots.len());
    for (host, rx) in slots {
        match rx.await {
            Ok(result) => results.push(result),
            Err(_) => results.push(lost(host)),
        }
    }
    results
}

// ---------------------------------------------------------------------------
// Generic JSON passthrough (status, prefs, driveshares, ...)
// ---------------------------------------------------------------------------

pub fn relative_json_route(path: KnownPath) -> axum::routing::MethodRouter<WebUiState> {
    axum::routing::post(
        move |State(state): State<WebUiState>,
              Extension(trace): Extension<RequestTrace>,
              body: Bytes| async move { relative_json(path, state, trace, body).await },
    )
}

async fn relative_json(
    path: KnownPath,
    state: WebUiState,
    trace: RequestTrace,
    body: Bytes,
) -> Response {
    let input: DefaultInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to decode input");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let adapter_path = path.adapter();
    let deadline = Instant::now() + OUTGOING_REQUEST_TIMEOUT;

    let mut slots = Vec::with_capacity(input.hosts.len());
    for host in input.hosts {
        let (tx, rx) = oneshot::channel();
        let client = state.client.clone();
        let trace = trace.clone();
        let adapter_path = adapter_path.clone();
        let slot_host = host.clone();
        tokio::spawn(async move {
            let mut result = DefaultResult {
                host: slot_host.clone(),
                ..DefaultResult::default()
            };
            let call =
                client.call_host(&trace, Method::POST, &slot_host, &adapter_path, None);
            match tokio::time::timeout_at(deadline, call).await {
                Err(elapsed) => result.error = elapsed.to_string(),
                Ok(Err(e)) => {
                    error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
                    result.error = e.to_string();
                }
                Ok(Ok(response)) => match serde_json::from_slice::<Value>(&response.body) {
                    Ok(value) => result.result = Some(value),
                    Err(e) => {
                        error!(trace_id = %trace.trace_id, error = %e, "failed to decode response from adapter");
                        result.error = e.to_string();
                    }
                },
            }
            let _ = tx.send(result);
        });
        slots.push((host, rx));
    }

    let results = collect(slots, |host| DefaultResult {
        host,
        error: "fan-out task dropped its result".to_owned(),
        ..DefaultResult::default()
    })
    .await;
    Json(results).into_response()
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PingTargets {
    host: String,
    targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PingFanoutInput {
    count: u32,
    #[serde(rename = "pingType")]
    ping_type: String,
    delay: String,
    args: Vec<PingTargets>,
}

#[derive(Debug, Default, Serialize)]
struct PingFanoutResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<Value>>,
}

pub async fn ping(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    body: Bytes,
) -> Response {
    let input: PingFanoutInput = match serde_json::from_slice(&body) {
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

    // (delay between pings * count) + default timeout
    let deadline = Instant::now() + delay * input.count + OUTGOING_REQUEST_TIMEOUT;

    let mut slots = Vec::new();
    for ping_target in &input.args {
        for target in &ping_target.targets {
            let (tx, rx) = oneshot::channel();
            let client = state.client.clone();
            let trace = trace.clone();
            let host = ping_target.host.clone();
            let target = target.clone();
            let command = PingInput {
                target: target.clone(),
                count: input.count,
                ping_type: input.ping_type.clone(),
                delay: input.delay.clone(),
            };
            let slot_key = format!("{}/{}", host, target);
            tokio::spawn(async move {
                let mut result = PingFanoutResult {
                    host: host.clone(),
                    target,
                    ..PingFanoutResult::default()
                };
                let body = match serde_json::to_vec(&command) {
                    Ok(body) => body,
                    Err(e) => {
                        result.error = e.to_string();
                        let _ = tx.send(result);
                        return;
                    }
                };
                let ping_path = KnownPath::Ping.adapter();
                let call = client.call_host(
                    &trace,
                    Method::POST,
                    &host,
                    &ping_path,
                    Some(body),
                );
                match tokio::time::timeout_at(deadline, call).await {
                    Err(elapsed) => result.error = elapsed.to_string(),
                    Ok(Err(e)) => {
                        error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
                        result.error = e.to_string();
                    }
                    Ok(Ok(response)) => {
                        match serde_json::from_slice::<Vec<Value>>(&response.body) {
                            Ok(pings) => result.results = Some(pings),
                            Err(e) => {
                                error!(trace_id = %trace.trace_id, error = %e, "failed to decode ping response from adapter");
                                result.error = e.to_string();
                            }
                        }
                    }
                }
                let _ = tx.send(result);
            });
            slots.push((slot_key, rx));
        }
    }

    let results = collect(slots, |key| PingFanoutResult {
        host: key,
        error: "fan-out task dropped its result".to_owned(),
        ..PingFanoutResult::default()
    })
    .await;
    Json(results).into_response()
}

// ---------------------------------------------------------------------------
// DNS query
// ---------------------------------------------------------------------------

pub async fn query_dns(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    body: Bytes,
) -> Response {
    let input: QueryDnsInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to decode querydns input");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let deadline = Instant::now() + OUTGOING_REQUEST_TIMEOUT;
    let command = QueryDnsInput {
        hosts: Vec::new(),
        name: input.name.clone(),
        query_type: input.query_type.clone(),
    };

    let mut slots = Vec::with_capacity(input.hosts.len());
    for host in input.hosts {
        let (tx, rx) = oneshot::channel();
        let client = state.client.clone();
        let trace = trace.clone();
        let command = command.clone();
        let slot_host = host.clone();
        tokio::spawn(async move {
            let mut result = QueryDnsResult {
                host: slot_host.clone(),
                ..QueryDnsResult::default()
            };
            let body = match serde_json::to_vec(&command) {
                Ok(body) => body,
                Err(e) => {
                    result.error = e.to_string();
                    let _ = tx.send(result);
                    return;
                }
            };
            let query_dns_path = KnownPath::QueryDns.adapter();
            let call = client.call_host(
                &trace,
                Method::POST,
                &slot_host,
                &query_dns_path,
                Some(body),
            );
            match tokio::time::timeout_at(deadline, call).await {
                Err(elapsed) => result.error = elapsed.to_string(),
                Ok(Err(e)) => {
                    error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
                    result.error = e.to_string();
                }
                Ok(Ok(response)) => {
                    match serde_json::from_slice::<QueryDnsResult>(&response.body) {
                        Ok(decoded) => {
                            result.header = decoded.header;
                            result.responses = decoded.responses;
                            result.resolvers = decoded.resolvers;
                        }
                        Err(e) => {
                            error!(trace_id = %trace.trace_id, error = %e, "failed to decode querydns response from adapter");
                            result.error = e.to_string();
                        }
                    }
                }
            }
            let _ = tx.send(result);
        });
        slots.push((host, rx));
    }

    let results = collect(slots, |host| QueryDnsResult {
        host,
        error: "fan-out task dropped its result".to_owned(),
        ..QueryDnsResult::default()
    })
    .await;
    Json(results).into_response()
}

// ---------------------------------------------------------------------------
// Profile dump
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
struct PprofFanoutResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    error: String,
    host: String,
    #[serde(rename = "type")]
    profile_type: String,
    #[serde(skip)]
    profile: Vec<u8>,
}

pub async fn pprof(
    State(state): State<WebUiState>,
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

    let deadline = Instant::now()
        + std::time::Duration::from_secs(u64::from(input.seconds))
        + OUTGOING_REQUEST_TIMEOUT;
    let command = PprofInput {
        hosts: Vec::new(),
        profile_type: input.profile_type.clone(),
        seconds: input.seconds,
    };

    let mut slots = Vec::with_capacity(input.hosts.len());
    for host in input.hosts {
        let (tx, rx) = oneshot::channel();
        let client = state.client.clone();
        let trace = trace.clone();
        let command = command.clone();
        let slot_host = host.clone();
        tokio::spawn(async move {
            let mut result = PprofFanoutResult {
                host: slot_host.clone(),
                profile_type: command.profile_type.clone(),
                ..PprofFanoutResult::default()
            };
            let body = match serde_json::to_vec(&command) {
                Ok(body) => body,
                Err(e) => {
                    result.error = e.to_string();
                    let _ = tx.send(result);
                    return;
                }
            };
            let pprof_path = KnownPath::Pprof.adapter();
            let call = client.call_host(
                &trace,
                Method::POST,
                &slot_host,
                &pprof_path,
                Some(body),
            );
            match tokio::time::timeout_at(deadline, call).await {
                Err(elapsed) => result.error = elapsed.to_string(),
                Ok(Err(e)) => {
                    error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
                    result.error = e.to_string();
                }
                Ok(Ok(response)) => result.profile = response.body.to_vec(),
            }
            let _ = tx.send(result);
        });
        slots.push((host, rx));
    }

    let mut results = collect(slots, |host| PprofFanoutResult {
        host,
        error: "fan-out task dropped its result".to_owned(),
        ..PprofFanoutResult::default()
    })
    .await;

    // Profiles land on disk next to the other static assets; the response
    // only reports per-host success.
    for result in &mut results {
        if result.error.is_empty() {
            if let Err(e) = write_profile(&state.static_dir, &result.host, &result.profile) {
                error!(trace_id = %trace.trace_id, error = %e, "failed to write pprof to file");
                result.error = e.to_string();
            }
        }
        result.profile = Vec::new();
    }

    Json(results).into_response()
}

fn write_profile(static_dir: &Path, host: &str, profile: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o770)
        .create(static_dir)?;
    std::fs::write(static_dir.join(format!("{}.pprof", host)), profile)
}

// ---------------------------------------------------------------------------
// Goroutine dump
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
struct GoroutinesResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    error: String,
    #[serde(
        with = "ts_proto::base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    result: Vec<u8>,
}

pub async fn goroutines(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    body: Bytes,
) -> Response {
    let input: DefaultInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to decode body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let deadline = Instant::now() + OUTGOING_REQUEST_TIMEOUT;

    let mut slots = Vec::with_capacity(input.hosts.len());
    for host in input.hosts {
        let (tx, rx) = oneshot::channel();
        let client = state.client.clone();
        let trace = trace.clone();
        let slot_host = host.clone();
        tokio::spawn(async move {
            let mut result = GoroutinesResult {
                host: slot_host.clone(),
                ..GoroutinesResult::default()
            };
            let goroutines_path = KnownPath::Goroutines.adapter();
            let call = client.call_host(
                &trace,
                Method::POST,
                &slot_host,
                &goroutines_path,
                None,
            );
            match tokio::time::timeout_at(deadline, call).await {
                Err(elapsed) => result.error = elapsed.to_string(),
                Ok(Err(e)) => {
                    error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
                    result.error = e.to_string();
                }
                Ok(Ok(response)) => result.result = response.body.to_vec(),
            }
            let _ = tx.send(result);
        });
        slots.push((host, rx));
    }

    let results = collect(slots, |host| GoroutinesResult {
        host,
        error: "fan-out task dropped its result".to_owned(),
        ..GoroutinesResult::default()
    })
    .await;
    Json(results).into_response()
}
