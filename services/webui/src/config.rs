//! WebUI configuration, built from CLI flags.

use ts_core::ServerConfig;

#[derive(Debug, Clone)]
pub struct WebUiConfig {
    pub server: ServerConfig,
    /// Login names admitted by the identity gate; empty defaults open.
    pub allowed_users: Vec<String>,
    /// OAuth scopes requested from the control plane.
    pub scopes: Vec<String>,
    /// Generate a device auth key through the control plane at startup and
    /// hand it to the overlay daemon.
    pub generate_auth: bool,
    /// Port every adapter listens on; the fleet must agree on one.
    pub adapter_port: u16,
}
