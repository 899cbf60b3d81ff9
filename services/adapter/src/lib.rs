// adapter: TSymbiote sidecar exposing LocalAPI-style calls on a managed host.
//
// One adapter runs next to each overlay daemon. It proxies unary daemon
// calls, streams logs and bus events over WebSockets, and admits only
// callers that carry the configured overlay tag.

pub mod config;
pub mod known_peers;
pub mod local_api;
pub mod passthrough;
pub mod ping;
pub mod querydns;
pub mod streams;

use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use config::AdapterConfig;
use known_peers::KnownPeers;
use local_api::{DaemonClient, LocalApi};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use ts_core::middleware::{identity_gate, trace_requests, GatePolicy, IdentityGate};
use ts_core::overlay::{DaemonOverlay, DevOverlay, Overlay};
use ts_core::{server, ws_manager, WsManager};
use ts_proto::KnownPath;

#[derive(Clone)]
pub struct AdapterState {
    pub local: Arc<dyn LocalApi>,
    pub known_peers: Arc<KnownPeers>,
    pub ws: WsManager,
}

/// Assemble the adapter router. Middleware order (outermost first): trace
/// binding, identity gate (skipped in dev mode), method/CORS, handler.
/// `/healthz` bypasses the gate.
pub fn build_router(state: AdapterState, overlay: Arc<dyn Overlay>, cfg: &AdapterConfig) -> Router {
    let mut api = Router::new()
        .route(&KnownPath::Ping.adapter(), post(ping::ping))
        .route(&KnownPath::Status.adapter(), post(passthrough::status))
        .route(&KnownPath::QueryDns.adapter(), post(querydns::query_dns))
        .route(&KnownPath::Pprof.adapter(), post(passthrough::pprof))
        .route(&KnownPath::Prefs.adapter(), post(passthrough::prefs))
        .route(
            &KnownPath::DriveShares.adapter(),
            post(passthrough::drive_shares),
        )
        .route(
            &KnownPath::DnsConfig.adapter(),
            post(passthrough::dns_config),
        )
        .route(
            &KnownPath::ServeConfig.adapter(),
            post(passthrough::serve_config),
        )
        .route(
            &KnownPath::AppConnRoutes.adapter(),
            post(passthrough::app_conn_routes),
        )
        .route(
            &KnownPath::Goroutines.adapter(),
            post(passthrough::goroutines),
        )
        .route(&KnownPath::Logs.adapter(), any(streams::logs))
        .route(&KnownPath::BusEvents.adapter(), any(streams::bus_events))
        .layer(CorsLayer::permissive())
        .with_state(state);

    if !cfg.server.dev {
        api = api.layer(middleware::from_fn_with_state(
            IdentityGate {
                overlay,
                policy: GatePolicy::RequiredTag(cfg.allowed_tag.clone()),
            },
            identity_gate,
        ));
    }

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(api)
        .layer(middleware::from_fn(trace_requests))
}

/// Build dependencies and serve until shutdown.
pub async fn run(cfg: AdapterConfig) -> Result<(), RunError> {
    if cfg.allowed_tag.is_empty() {
        return Err(RunError::Config("allowed-tag must be set".to_owned()));
    }

    let socket_path = cfg.socket_path().map_err(RunError::Config)?;
    info!(socket = %socket_path.display(), "using daemon socket");

    let overlay: Arc<dyn Overlay> = if cfg.server.dev {
        info!("dev mode enabled, authentication is disabled");
        Arc::new(DevOverlay::new(&cfg.server.hostname))
    } else {
        Arc::new(DaemonOverlay::new(&cfg.server.hostname, socket_path.clone()))
    };
    let local: Arc<dyn LocalApi> = Arc::new(DaemonClient::new(socket_path));

    let (ws_base_tx, ws_manager) = ws_manager::new_pair();
    let state = AdapterState {
        local,
        known_peers: Arc::new(KnownPeers::default()),
        ws: ws_manager.clone(),
    };
    let router = build_router(state, overlay.clone(), &cfg);

    server::serve(router, overlay, &cfg.server, ws_manager, ws_base_tx)
        .await
        .map_err(RunError::Serve)
}

#[derive(Debug)]
pub enum RunError {
    Config(String),
    Serve(server::ServeError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(s) => write!(f, "configuration error: {}", s),
            RunError::Serve(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RunError {}
