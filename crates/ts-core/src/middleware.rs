//! Request middleware: trace binding and overlay-identity gates.
//!
//! Ordering matters and is fixed by the router assembly in each service:
//! trace binding runs outermost so that failed-auth responses still log with
//! a trace ID, the identity gate runs next, and method routing / CORS / WS
//! upgrade are innermost.

use crate::overlay::Overlay;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use ts_proto::{TRACE_ID_HEADER, USERNAME_HEADER};
use uuid::Uuid;

/// Per-request metadata carried through the pipeline in request extensions.
///
/// `trace_id` is adopted from the `trace-id` header or minted fresh;
/// `username` starts from the `ts-username` header (WebUI -> adapter
/// propagation) and is overwritten by the WebUI identity gate from WhoIs.
#[derive(Debug, Clone, Default)]
pub struct RequestTrace {
    pub trace_id: String,
    pub username: String,
}

/// Outermost middleware: bind the trace ID and log the request outcome.
pub async fn trace_requests(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let username = req
        .headers()
        .get(USERNAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_default();

    req.extensions_mut().insert(RequestTrace {
        trace_id: trace_id.clone(),
        username: username.clone(),
    });

    let start = Instant::now();
    let response = next.run(req).await;

    info!(
        trace_id = %trace_id,
        user = %username,
        addr = %remote,
        method = %method,
        path = %path,
        elapsed = ?start.elapsed(),
        status = response.status().as_u16(),
        "request complete"
    );
    response
}

/// Caller admission policy for [`identity_gate`].
#[derive(Clone)]
pub enum GatePolicy {
    /// WebUI form: allow only these login names. An empty list defaults open
    /// (logged once at startup).
    AllowedUsers(Vec<String>),
    /// Adapter form: the caller's overlay tag set must contain this tag.
    RequiredTag(String),
}

#[derive(Clone)]
pub struct IdentityGate {
    pub overlay: Arc<dyn Overlay>,
    pub policy: GatePolicy,
}

/// Overlay `who_is` gate. Not installed in dev mode.
pub async fn identity_gate(
    State(gate): State<IdentityGate>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace = req.extensions().get::<RequestTrace>().cloned().unwrap_or_default();

    let who = match gate.overlay.who_is(remote_addr).await {
        Ok(who) => who,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to get whois");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match &gate.policy {
        GatePolicy::AllowedUsers(allowed) => {
            req.extensions_mut().insert(RequestTrace {
                trace_id: trace.trace_id.clone(),
                username: who.login_name.clone(),
            });
            if !allowed.is_empty() && !allowed.iter().any(|u| u == &who.login_name) {
                return StatusCode::FORBIDDEN.into_response();
            }
        }
        GatePolicy::RequiredTag(tag) => {
            if !who.tags.iter().any(|t| t == tag) {
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }

    next.run(req).await
}
