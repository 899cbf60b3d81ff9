//! Shared harness: a WebUI served on a loopback port, wired to a mock
//! overlay and a scriptable control plane.
#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use ts_core::overlay::Overlay;
use ts_core::{ws_manager, ServerConfig, WsManager};
use ts_test_utils::MockOverlay;
use webui::client::AdapterClient;
use webui::config::WebUiConfig;
use webui::control::{ControlError, ControlPlane, Device};
use webui::directory::AdapterDirectory;
use webui::{build_router, WebUiState};

pub struct FakeControl {
    devices: Mutex<Vec<Device>>,
}

impl FakeControl {
    pub fn new(devices: Vec<Device>) -> Self {
        FakeControl {
            devices: Mutex::new(devices),
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControl {
    async fn devices_with_tag(&self, tag: &str) -> Result<Vec<Device>, ControlError> {
        Ok(self
            .devices
            .lock()
            .expect("devices lock")
            .iter()
            .filter(|d| d.tags.iter().any(|t| t == tag))
            .cloned()
            .collect())
    }

    async fn generate_auth_key(&self, _tags: &[String]) -> Result<String, ControlError> {
        Ok("test-key".to_owned())
    }
}

pub fn device(hostname: &str, online: bool) -> Device {
    Device {
        hostname: hostname.to_owned(),
        tags: vec!["tag:tsymbiote-adapter".to_owned()],
        online,
    }
}

pub struct TestWebUi {
    pub addr: SocketAddr,
    pub overlay: Arc<MockOverlay>,
    pub directory: Arc<AdapterDirectory>,
    pub ws: WsManager,
    pub static_dir: tempfile::TempDir,
    // Kept alive for the lifetime of the server; dropping it would read as
    // process shutdown to every WS task.
    _ws_base_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TestWebUi {
    pub async fn spawn(devices: Vec<Device>) -> Self {
        let overlay = Arc::new(MockOverlay::new("tsymbiote-webui-test"));
        let directory = Arc::new(AdapterDirectory::default());
        let (ws_base_tx, ws_manager) = ws_manager::new_pair();
        let static_dir = tempfile::tempdir().expect("create static dir");

        let cfg = WebUiConfig {
            server: ServerConfig {
                port: 0,
                hostname: "tsymbiote-webui-test".to_owned(),
                dev: true,
                logout: false,
            },
            allowed_users: Vec::new(),
            scopes: Vec::new(),
            generate_auth: false,
            adapter_port: 0,
        };

        let overlay_dyn: Arc<dyn Overlay> = overlay.clone();
        let state = WebUiState {
            overlay: overlay_dyn.clone(),
            directory: directory.clone(),
            client: Arc::new(AdapterClient::new(overlay_dyn.clone(), directory.clone(), 0)),
            control: Arc::new(FakeControl::new(devices)),
            ws: ws_manager.clone(),
            adapter_port: 0,
            static_dir: PathBuf::from(static_dir.path()),
        };
        let router = build_router(state, overlay_dyn, &cfg);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test webui");
        let addr = listener.local_addr().expect("test webui local_addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        TestWebUi {
            addr,
            overlay,
            directory,
            ws: ws_manager,
            static_dir,
            _ws_base_tx: ws_base_tx,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    /// Signal process shutdown to every tracked WS task.
    pub fn cancel_ws_base(&self) {
        let _ = self._ws_base_tx.send(true);
    }
}

impl Drop for TestWebUi {
    fn drop(&mut self) {
        self.task.abort();
    }
}
