//! Shared harness: an adapter served on a loopback port with a scriptable
//! LocalAPI in place of the daemon.
#![allow(dead_code)]

use adapter::config::AdapterConfig;
use adapter::known_peers::KnownPeers;
use adapter::local_api::{DnsAnswer, LocalApi};
use adapter::{build_router, AdapterState};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use ts_core::localapi::LocalApiError;
use ts_core::overlay::Overlay;
use ts_core::{ws_manager, ServerConfig, WsManager};
use ts_test_utils::MockOverlay;

pub struct FakeLocalApi {
    pub status: Mutex<Value>,
    pub ping_result: Mutex<Value>,
    pub ping_calls: AtomicUsize,
    pub dns_answer: Mutex<DnsAnswer>,
    pub stream_lines: Mutex<Vec<String>>,
    /// Keep the stream open after the scripted lines instead of ending it.
    pub hold_stream_open: Mutex<bool>,
}

impl Default for FakeLocalApi {
    fn default() -> Self {
        FakeLocalApi {
            status: Mutex::new(json!({"Self": {"HostName": "test-host"}})),
            ping_result: Mutex::new(json!({"LatencySeconds": 0.001})),
            ping_calls: AtomicUsize::new(0),
            dns_answer: Mutex::new(DnsAnswer::default()),
            stream_lines: Mutex::new(Vec::new()),
            hold_stream_open: Mutex::new(false),
        }
    }
}

impl FakeLocalApi {
    fn line_stream(&self) -> BoxStream<'static, Result<Bytes, LocalApiError>> {
        let lines = self.stream_lines.lock().expect("lines lock").clone();
        let chunks: Vec<Result<Bytes, LocalApiError>> = lines
            .into_iter()
            .map(|line| Ok(Bytes::from(format!("{}\n", line))))
            .collect();
        let scripted = futures_util::stream::iter(chunks);
        if *self.hold_stream_open.lock().expect("hold lock") {
            scripted.chain(futures_util::stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }
}

#[async_trait]
impl LocalApi for FakeLocalApi {
    async fn status(&self) -> Result<Value, LocalApiError> {
        Ok(self.status.lock().expect("status lock").clone())
    }

    async fn prefs(&self) -> Result<Value, LocalApiError> {
        Ok(json!({"WantRunning": true}))
    }

    async fn drive_shares(&self) -> Result<Value, LocalApiError> {
        Ok(json!({}))
    }

    async fn dns_os_config(&self) -> Result<Value, LocalApiError> {
        Ok(json!({"nameservers": ["100.100.100.100"]}))
    }

    async fn serve_config(&self) -> Result<Value, LocalApiError> {
        Ok(json!({}))
    }

    async fn app_conn_routes(&self) -> Result<Value, LocalApiError> {
        Ok(json!({}))
    }

    async fn ping(&self, _target: IpAddr, _ping_type: &str) -> Result<Value, LocalApiError> {
        self.ping_calls.fetch_add(1, Ordering::AcqRel);
        Ok(self.ping_result.lock().expect("ping lock").clone())
    }

    async fn query_dns(&self, _name: &str, _query_type: &str) -> Result<DnsAnswer, LocalApiError> {
        Ok(self.dns_answer.lock().expect("dns lock").clone())
    }

    async fn pprof(&self, _profile_type: &str, _seconds: u32) -> Result<Bytes, LocalApiError> {
        Ok(Bytes::from_static(b"profile-bytes"))
    }

    async fn goroutines(&self) -> Result<Bytes, LocalApiError> {
        Ok(Bytes::from_static(b"goroutine dump"))
    }

    async fn tail_daemon_logs(
        &self,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError> {
        Ok(self.line_stream())
    }

    async fn stream_bus_events(
        &self,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError> {
        Ok(self.line_stream())
    }
}

pub struct TestAdapter {
    pub addr: SocketAddr,
    pub local: Arc<FakeLocalApi>,
    pub known_peers: Arc<KnownPeers>,
    pub overlay: Arc<MockOverlay>,
    pub ws: WsManager,
    ws_base_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TestAdapter {
    pub async fn spawn(dev: bool) -> Self {
        let local = Arc::new(FakeLocalApi::default());
        let overlay = Arc::new(MockOverlay::new("tsymbiote-adapter-test"));
        let known_peers = Arc::new(KnownPeers::default());
        let (ws_base_tx, ws_manager) = ws_manager::new_pair();

        let cfg = AdapterConfig {
            server: ServerConfig {
                port: 0,
                hostname: "tsymbiote-adapter-test".to_owned(),
                dev,
                logout: false,
            },
            allowed_tag: "tag:tsymbiote-webui".to_owned(),
            socket: None,
            discover_socket: false,
        };

        let state = AdapterState {
            local: local.clone(),
            known_peers: known_peers.clone(),
            ws: ws_manager.clone(),
        };
        let overlay_dyn: Arc<dyn Overlay> = overlay.clone();
        let router = build_router(state, overlay_dyn, &cfg);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test adapter");
        let addr = listener.local_addr().expect("test adapter local_addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        TestAdapter {
            addr,
            local,
            known_peers,
            overlay,
            ws: ws_manager,
            ws_base_tx,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Signal process shutdown to every tracked WS task.
    pub fn cancel_ws_base(&self) {
        let _ = self.ws_base_tx.send(true);
    }
}

impl Drop for TestAdapter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
