// webui: TSymbiote's browser-facing control surface.
//
// A single WebUI serves the whole fleet: it discovers adapters through the
// control plane, fans unary queries out to a caller-selected subset of them,
// and aggregates their log/event streams into one multiplexed WebSocket per
// browser client.

pub mod aggregator;
pub mod client;
pub mod config;
pub mod control;
pub mod debug;
pub mod directory;
pub mod fanout;
pub mod hosts;
pub mod peermap;

use axum::middleware;
use axum::routing::{any, get};
use axum::Router;
use client::AdapterClient;
use config::WebUiConfig;
use control::{ControlPlane, OauthControlClient};
use directory::AdapterDirectory;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;
use ts_core::localapi::{discover_socket, DEFAULT_SOCKET_PATH};
use ts_core::middleware::{identity_gate, trace_requests, GatePolicy, IdentityGate};
use ts_core::overlay::{DaemonOverlay, DevOverlay, Overlay};
use ts_core::{server, ws_manager, WsManager};
use ts_proto::{KnownPath, WEBUI_TAG};

/// Static assets and pprof dumps live here; the directory is created on
/// demand with mode 0770.
pub const STATIC_DIR: &str = "/tmp/TSymbiote/static/";

#[derive(Clone)]
pub struct WebUiState {
    pub overlay: Arc<dyn Overlay>,
    pub directory: Arc<AdapterDirectory>,
    pub client: Arc<AdapterClient>,
    pub control: Arc<dyn ControlPlane>,
    pub ws: WsManager,
    pub adapter_port: u16,
    pub static_dir: PathBuf,
}

/// Assemble the WebUI router. Middleware order (outermost first): trace
/// binding, identity gate (skipped in dev mode), method/CORS, handler.
/// `/healthz` bypasses the gate; everything else, static assets included,
/// sits behind it.
pub fn build_router(state: WebUiState, overlay: Arc<dyn Overlay>, cfg: &WebUiConfig) -> Router {
    let static_dir = state.static_dir.clone();
    let mut api = Router::new()
        .route(&KnownPath::Hosts.webui(), get(hosts::hosts))
        .route(&KnownPath::PeerMap.webui(), get(peermap::peer_map))
        .route(&KnownPath::Ping.webui(), axum::routing::post(fanout::ping))
        .route(
            &KnownPath::QueryDns.webui(),
            axum::routing::post(fanout::query_dns),
        )
        .route(&KnownPath::Pprof.webui(), axum::routing::post(fanout::pprof))
        .route(
            &KnownPath::Goroutines.webui(),
            axum::routing::post(fanout::goroutines),
        )
        .route(
            &KnownPath::Status.webui(),
            fanout::relative_json_route(KnownPath::Status),
        )
        .route(
            &KnownPath::Prefs.webui(),
            fanout::relative_json_route(KnownPath::Prefs),
        )
        .route(
            &KnownPath::DriveShares.webui(),
            fanout::relative_json_route(KnownPath::DriveShares),
        )
        .route(
            &KnownPath::DnsConfig.webui(),
            fanout::relative_json_route(KnownPath::DnsConfig),
        )
        .route(
            &KnownPath::ServeConfig.webui(),
            fanout::relative_json_route(KnownPath::ServeConfig),
        )
        .route(
            &KnownPath::AppConnRoutes.webui(),
            fanout::relative_json_route(KnownPath::AppConnRoutes),
        )
        .route(&KnownPath::Logs.webui(), any(aggregator::logs))
        .route(&KnownPath::BusEvents.webui(), any(aggregator::bus_events))
        .route("/{host}/debug/pprof/", get(debug::remote_debug_index))
        .route("/{host}/debug/pprof/{*rest}", get(debug::remote_debug))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    if !cfg.server.dev {
        api = api.layer(middleware::from_fn_with_state(
            IdentityGate {
                overlay,
                policy: GatePolicy::AllowedUsers(cfg.allowed_users.clone()),
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
pub async fn run(cfg: WebUiConfig) -> Result<(), RunError> {
    let control: Arc<dyn ControlPlane> = Arc::new(
        OauthControlClient::from_env(cfg.scopes.clone()).map_err(|e| RunError::Config(e.to_string()))?,
    );

    let overlay: Arc<dyn Overlay> = if cfg.server.dev {
        info!("dev mode enabled, authentication is disabled");
        Arc::new(DevOverlay::new(&cfg.server.hostname))
    } else {
        let socket_path =
            discover_socket().unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
        let daemon = DaemonOverlay::new(&cfg.server.hostname, socket_path);
        if cfg.generate_auth {
            let key = control
                .generate_auth_key(&[WEBUI_TAG.to_owned()])
                .await
                .map_err(|e| RunError::Config(e.to_string()))?;
            daemon
                .login(&key)
                .await
                .map_err(|e| RunError::Config(e.to_string()))?;
        }
        Arc::new(daemon)
    };

    if cfg.allowed_users.is_empty() {
        info!("no allowed-users provided, all requests over the overlay will be allowed");
    }

    let (ws_base_tx, ws_manager) = ws_manager::new_pair();
    let directory = Arc::new(AdapterDirectory::default());
    let state = WebUiState {
        overlay: overlay.clone(),
        directory: directory.clone(),
        client: Arc::new(AdapterClient::new(
            overlay.clone(),
            directory,
            cfg.adapter_port,
        )),
        control,
        ws: ws_manager.clone(),
        adapter_port: cfg.adapter_port,
        static_dir: PathBuf::from(STATIC_DIR),
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
