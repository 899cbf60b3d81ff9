//! Bidirectional peer-name <-> overlay-IP registry.
//!
//! Populated from daemon status snapshots whenever `/status` is served, and
//! consulted when translating a user-supplied peer name into an address for
//! ping. Entries are overwritten, never deleted; both directions are updated
//! under one writer critical section.

use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct KnownPeers {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<String, IpAddr>,
    ips: HashMap<IpAddr, String>,
}

impl KnownPeers {
    pub async fn store_peer(&self, peer: &str, ip: IpAddr) {
        let mut inner = self.inner.write().await;
        inner.peers.insert(peer.to_owned(), ip);
        inner.ips.insert(ip, peer.to_owned());
    }

    /// Pull every peer out of a daemon status snapshot. Peers without an
    /// overlay IP are skipped.
    pub async fn store_status(&self, status: &Value) {
        let Some(peers) = status.get("Peer").and_then(Value::as_object) else {
            return;
        };
        for peer in peers.values() {
            let Some(hostname) = peer.get("HostName").and_then(Value::as_str) else {
                continue;
            };
            let Some(ip) = peer
                .pointer("/TailscaleIPs/0")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<IpAddr>().ok())
            else {
                continue;
            };
            self.store_peer(hostname, ip).await;
        }
    }

    pub async fn ip_by_peer(&self, peer: &str) -> Option<IpAddr> {
        self.inner.read().await.peers.get(peer).copied()
    }

    pub async fn peer_by_ip(&self, ip: IpAddr) -> Option<String> {
        self.inner.read().await.ips.get(&ip).cloned()
    }
}
