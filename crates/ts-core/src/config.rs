//! Base server configuration shared by the adapter and the WebUI.
//!
//! Built from CLI flags by the `tsymbiote` binary; the hostname is already
//! resolved (explicit `--hostname`, or prefix plus random suffix) by the
//! time this record exists.

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the HTTP surface listens on. Both services default to 3621.
    pub port: u16,
    /// Overlay hostname this node registers as.
    pub hostname: String,
    /// Dev mode: plain loopback TCP, identity gates disabled.
    pub dev: bool,
    /// Call overlay logout during shutdown.
    pub logout: bool,
}
