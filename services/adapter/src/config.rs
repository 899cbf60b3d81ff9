//! Adapter configuration, built from CLI flags.

use std::path::PathBuf;
use ts_core::localapi::{discover_socket, DEFAULT_SOCKET_PATH};
use ts_core::ServerConfig;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub server: ServerConfig,
    /// Overlay tag required of callers; requests from anything that is not
    /// the WebUI are rejected.
    pub allowed_tag: String,
    /// Explicit daemon socket path.
    pub socket: Option<PathBuf>,
    /// Probe well-known socket locations (sidecar deployments).
    pub discover_socket: bool,
}

impl AdapterConfig {
    /// Resolve the daemon socket path: explicit flag wins, then discovery,
    /// then the default location.
    pub fn socket_path(&self) -> Result<PathBuf, String> {
        if let Some(path) = &self.socket {
            return Ok(path.clone());
        }
        if self.discover_socket {
            return discover_socket()
                .ok_or_else(|| "failed to discover daemon socket path".to_owned());
        }
        Ok(PathBuf::from(DEFAULT_SOCKET_PATH))
    }
}
