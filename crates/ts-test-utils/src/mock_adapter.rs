//! A scriptable adapter peer.
//!
//! Answers the adapter's unary POST surface with configured JSON bodies and
//! serves `/logs` / `/busevents` WebSockets that emit configured frames.
//! `abort()` kills the whole server mid-stream to simulate adapter death.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub trace_id: String,
    pub username: String,
}

/// What the WebSocket handler does after sending its scripted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsAfter {
    /// Send a normal close frame and end.
    CloseNormally,
    /// Keep the socket open (answering protocol pings) until the peer
    /// closes or the server is aborted.
    StayOpen,
}

struct MockState {
    responses: Mutex<HashMap<String, serde_json::Value>>,
    fail_with: Mutex<Option<u16>>,
    response_delay: Mutex<Option<Duration>>,
    ws_frames: Mutex<Vec<String>>,
    ws_frame_delay: Mutex<Option<Duration>>,
    ws_after: Mutex<WsAfter>,
    live_frames: tokio::sync::broadcast::Sender<String>,
    ws_connections: std::sync::atomic::AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct MockAdapter {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: tokio::task::JoinHandle<()>,
}

impl MockAdapter {
    pub async fn start() -> Self {
        let (live_frames, _) = tokio::sync::broadcast::channel(64);
        let state = Arc::new(MockState {
            responses: Mutex::new(HashMap::new()),
            fail_with: Mutex::new(None),
            response_delay: Mutex::new(None),
            ws_frames: Mutex::new(Vec::new()),
            ws_frame_delay: Mutex::new(None),
            ws_after: Mutex::new(WsAfter::StayOpen),
            live_frames,
            ws_connections: std::sync::atomic::AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/logs", any(ws_handler))
            .route("/busevents", any(ws_handler))
            .route("/{path}", post(unary_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock adapter");
        let addr = listener.local_addr().expect("mock adapter local_addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        MockAdapter { addr, state, task }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Body returned for `POST /<name>`. `/status` is just another name.
    pub fn set_response(&self, name: &str, body: serde_json::Value) {
        self.state
            .responses
            .lock()
            .expect("responses lock")
            .insert(name.to_owned(), body);
    }

    /// Make every unary call fail with this HTTP status.
    pub fn set_fail(&self, status: u16) {
        *self.state.fail_with.lock().expect("fail lock") = Some(status);
    }

    /// Delay every unary response, e.g. to trip fan-out deadlines.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.state.response_delay.lock().expect("delay lock") = Some(delay);
    }

    /// Text frames the WS endpoints emit after accepting a connection.
    pub fn set_ws_frames(&self, frames: Vec<String>) {
        *self.state.ws_frames.lock().expect("frames lock") = frames;
    }

    pub fn set_ws_frame_delay(&self, delay: Duration) {
        *self.state.ws_frame_delay.lock().expect("frame delay lock") = Some(delay);
    }

    pub fn set_ws_after(&self, after: WsAfter) {
        *self.state.ws_after.lock().expect("ws after lock") = after;
    }

    /// Push a frame to every currently-open WS connection (StayOpen mode).
    pub fn push_ws_frame(&self, frame: impl Into<String>) {
        let _ = self.state.live_frames.send(frame.into());
    }

    /// Connections that have reached the frame loop and will observe pushed
    /// frames.
    pub fn ws_connections(&self) -> usize {
        self.state
            .ws_connections
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Block until `count` WS connections are live, or panic after ~2 s.
    pub async fn wait_for_ws_connections(&self, count: usize) {
        for _ in 0..200 {
            if self.ws_connections() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} live ws connection(s)", count);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }

    /// Kill the server outright; open sockets die without close frames.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for MockAdapter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn record(state: &MockState, path: &str, headers: &HeaderMap) {
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(RecordedRequest {
            path: path.to_owned(),
            trace_id: header_value(headers, "trace-id"),
            username: header_value(headers, "ts-username"),
        });
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

async fn unary_handler(
    State(state): State<Arc<MockState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    record(&state, &path, &headers);

    let delay = *state.response_delay.lock().expect("delay lock");
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let fail = *state.fail_with.lock().expect("fail lock");
    if let Some(status) = fail {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    let body = state
        .responses
        .lock()
        .expect("responses lock")
        .get(&path)
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Json(body).into_response()
}

async fn ws_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    record(&state, "ws", &headers);
    ws.on_upgrade(move |socket| serve_ws(state, socket))
}

async fn serve_ws(state: Arc<MockState>, mut socket: WebSocket) {
    let frames = state.ws_frames.lock().expect("frames lock").clone();
    let frame_delay = *state.ws_frame_delay.lock().expect("frame delay lock");
    let after = *state.ws_after.lock().expect("ws after lock");

    // Subscribe before announcing the connection so a frame pushed right
    // after `wait_for_ws_connections` returns is never lost.
    let mut live = state.live_frames.subscribe();
    state
        .ws_connections
        .fetch_add(1, std::sync::atomic::Ordering::AcqRel);

    for frame in frames {
        if let Some(delay) = frame_delay {
            tokio::time::sleep(delay).await;
        }
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    match after {
        WsAfter::CloseNormally => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: axum::extract::ws::close_code::NORMAL,
                    reason: "".into(),
                })))
                .await;
        }
        WsAfter::StayOpen => {
            // recv() answers protocol pings internally; ends on close/error.
            loop {
                tokio::select! {
                    frame = live.recv() => {
                        let Ok(frame) = frame else { break };
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    msg = socket.recv() => {
                        match msg {
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        }
    }
}
