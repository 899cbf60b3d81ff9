//! The interface the fan-out core consumes from the overlay-mesh runtime.
//!
//! The mesh itself (peer-to-peer, identity-authenticated IP fabric) is an
//! external collaborator. The core needs four things from it: a listener,
//! a dialer that understands overlay hostnames, `who_is` identity lookup for
//! the auth gates, and `logout` for configuration-gated key expiry on exit.

use crate::localapi::{LocalApiError, UnixHttpClient};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpListener, TcpStream};

/// Identity of an inbound caller as reported by the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoIs {
    pub login_name: String,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// The overlay hostname this node is reachable as.
    fn hostname(&self) -> String;

    /// Listen for inbound overlay connections on `port`.
    async fn listen(&self, port: u16) -> Result<TcpListener, OverlayError>;

    /// Dial `host:port` across the mesh. `host` is an overlay hostname.
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, OverlayError>;

    /// Resolve the overlay identity behind a remote address.
    async fn who_is(&self, remote_addr: SocketAddr) -> Result<WhoIs, OverlayError>;

    /// Expire this node's key. Called on shutdown when `--logout` is set.
    async fn logout(&self) -> Result<(), OverlayError>;
}

#[derive(Debug)]
pub enum OverlayError {
    Io(std::io::Error),
    Daemon(String),
}

impl std::fmt::Display for OverlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayError::Io(e) => write!(f, "overlay io error: {}", e),
            OverlayError::Daemon(s) => write!(f, "overlay daemon error: {}", s),
        }
    }
}

impl std::error::Error for OverlayError {}

impl From<std::io::Error> for OverlayError {
    fn from(e: std::io::Error) -> Self {
        OverlayError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// DevOverlay: plain TCP, no identity
// ---------------------------------------------------------------------------

/// `--dev` backend: loopback TCP, permissive identity, no-op logout.
/// The auth gates are not installed in dev mode, so `who_is` only exists to
/// satisfy the trait.
pub struct DevOverlay {
    hostname: String,
}

impl DevOverlay {
    pub fn new(hostname: impl Into<String>) -> Self {
        DevOverlay {
            hostname: hostname.into(),
        }
    }
}

#[async_trait]
impl Overlay for DevOverlay {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn listen(&self, port: u16) -> Result<TcpListener, OverlayError> {
        Ok(TcpListener::bind(("127.0.0.1", port)).await?)
    }

    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, OverlayError> {
        Ok(TcpStream::connect((host, port)).await?)
    }

    async fn who_is(&self, _remote_addr: SocketAddr) -> Result<WhoIs, OverlayError> {
        Ok(WhoIs {
            login_name: "dev@localhost".to_owned(),
            tags: Vec::new(),
        })
    }

    async fn logout(&self) -> Result<(), OverlayError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DaemonOverlay: co-located overlay daemon
// ---------------------------------------------------------------------------

/// Production backend. Dial and listen use the host network stack (the
/// daemon's TUN device routes overlay hostnames); identity lookups and logout
/// go through the daemon's LocalAPI over its unix socket.
pub struct DaemonOverlay {
    hostname: String,
    local: UnixHttpClient,
}

impl DaemonOverlay {
    pub fn new(hostname: impl Into<String>, socket_path: PathBuf) -> Self {
        DaemonOverlay {
            hostname: hostname.into(),
            local: UnixHttpClient::new(socket_path),
        }
    }

    /// Hand a freshly minted auth key to the daemon (`--generate-auth`).
    pub async fn login(&self, auth_key: &str) -> Result<(), OverlayError> {
        self.local
            .post(&format!("/localapi/v0/login?authkey={}", auth_key), None)
            .await
            .map_err(daemon_err)?;
        Ok(())
    }
}

#[async_trait]
impl Overlay for DaemonOverlay {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn listen(&self, port: u16) -> Result<TcpListener, OverlayError> {
        Ok(TcpListener::bind(("0.0.0.0", port)).await?)
    }

    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, OverlayError> {
        Ok(TcpStream::connect((host, port)).await?)
    }

    async fn who_is(&self, remote_addr: SocketAddr) -> Result<WhoIs, OverlayError> {
        let body = self
            .local
            .get(&format!("/localapi/v0/whois?addr={}", remote_addr))
            .await
            .map_err(daemon_err)?;
        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| OverlayError::Daemon(e.to_string()))?;

        let login_name = value
            .pointer("/UserProfile/LoginName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let tags = value
            .pointer("/Node/Tags")
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(ToOwned::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        Ok(WhoIs { login_name, tags })
    }

    async fn logout(&self) -> Result<(), OverlayError> {
        self.local
            .post("/localapi/v0/logout", None)
            .await
            .map_err(daemon_err)?;
        Ok(())
    }
}

fn daemon_err(e: LocalApiError) -> OverlayError {
    OverlayError::Daemon(e.to_string())
}
