// ts-core: Shared server skeleton for the TSymbiote adapter and WebUI.
//
// Both services are the same shape: an axum router bound to an overlay
// listener, a middleware pipeline that binds trace IDs and gates callers on
// overlay identity, a WebSocket manager that decouples socket lifetime from
// the request scope, and a bounded graceful drain on shutdown.

pub mod config;
pub mod localapi;
pub mod middleware;
pub mod overlay;
pub mod server;
pub mod ws_manager;

pub use config::ServerConfig;
pub use middleware::RequestTrace;
pub use overlay::{DevOverlay, Overlay, WhoIs};
pub use ws_manager::WsManager;
