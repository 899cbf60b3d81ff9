//! A stand-in overlay mesh: hostnames resolve through an in-memory table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::net::{TcpListener, TcpStream};
use ts_core::overlay::{Overlay, OverlayError, WhoIs};

pub struct MockOverlay {
    hostname: String,
    peers: Mutex<HashMap<String, SocketAddr>>,
    whois: Mutex<WhoIs>,
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    logged_out: AtomicBool,
}

impl MockOverlay {
    pub fn new(hostname: impl Into<String>) -> Self {
        MockOverlay {
            hostname: hostname.into(),
            peers: Mutex::new(HashMap::new()),
            whois: Mutex::new(WhoIs {
                login_name: "tester@example.com".to_owned(),
                tags: Vec::new(),
            }),
            listener: tokio::sync::Mutex::new(None),
            logged_out: AtomicBool::new(false),
        }
    }

    /// Make `name` dialable at `addr`.
    pub fn register(&self, name: impl Into<String>, addr: SocketAddr) {
        self.peers
            .lock()
            .expect("peer table lock")
            .insert(name.into(), addr);
    }

    /// Identity reported for every inbound caller.
    pub fn set_whois(&self, whois: WhoIs) {
        *self.whois.lock().expect("whois lock") = whois;
    }

    /// Pre-bound listener handed out by the next `listen` call, so tests can
    /// learn the port before starting the server.
    pub async fn stash_listener(&self, listener: TcpListener) {
        *self.listener.lock().await = Some(listener);
    }

    pub fn logged_out(&self) -> bool {
        self.logged_out.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Overlay for MockOverlay {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn listen(&self, port: u16) -> Result<TcpListener, OverlayError> {
        if let Some(listener) = self.listener.lock().await.take() {
            return Ok(listener);
        }
        Ok(TcpListener::bind(("127.0.0.1", port)).await?)
    }

    async fn dial(&self, host: &str, _port: u16) -> Result<TcpStream, OverlayError> {
        let addr = {
            let peers = self.peers.lock().expect("peer table lock");
            peers.get(host).copied()
        };
        match addr {
            Some(addr) => Ok(TcpStream::connect(addr).await?),
            None => Err(OverlayError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such overlay host: {}", host),
            ))),
        }
    }

    async fn who_is(&self, _remote_addr: SocketAddr) -> Result<WhoIs, OverlayError> {
        Ok(self.whois.lock().expect("whois lock").clone())
    }

    async fn logout(&self) -> Result<(), OverlayError> {
        self.logged_out.store(true, Ordering::Release);
        Ok(())
    }
}
