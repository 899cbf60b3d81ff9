//! WebSocket aggregation: ordering, upstream death, heartbeats, teardown.

mod common;

use common::TestWebUi;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use ts_proto::HostMessage;
use ts_test_utils::{MockAdapter, WsAfter};

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(webui: &TestWebUi, path_and_query: &str) -> ClientSocket {
    let (socket, _response) = tokio_tungstenite::connect_async(webui.ws_url(path_and_query))
        .await
        .expect("client connect should succeed");
    socket
}

/// Read frames until a text frame arrives, failing on close or timeout.
async fn next_text(socket: &mut ClientSocket, wait: Duration) -> String {
    loop {
        let frame = timeout(wait, socket.next())
            .await
            .expect("frame should arrive in time")
            .expect("socket should stay open")
            .expect("read should succeed");
        match frame {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

async fn expect_close(socket: &mut ClientSocket, wait: Duration) {
    loop {
        match timeout(wait, socket.next())
            .await
            .expect("close should arrive in time")
        {
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close frame, got {:?}", other),
            // A reset after close-send also counts as the connection ending.
            Some(Err(_)) => return,
        }
    }
}

fn decode_envelope(text: &str) -> HostMessage {
    serde_json::from_str(text).expect("frame should be a host-message envelope")
}

#[tokio::test]
async fn empty_hosts_param_closes_immediately() {
    let webui = TestWebUi::spawn(Vec::new()).await;

    let mut socket = connect(&webui, "/api/logs?hosts=").await;
    expect_close(&mut socket, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn frames_from_one_upstream_stay_ordered_through_its_death() {
    let webui = TestWebUi::spawn(Vec::new()).await;
    let adapter = MockAdapter::start().await;
    let frames: Vec<String> = (0..1000).map(|i| format!("log line {i}")).collect();
    adapter.set_ws_frames(frames.clone());
    adapter.set_ws_after(WsAfter::CloseNormally);

    webui.overlay.register("adapter-x", adapter.addr());
    webui.directory.store("x", "adapter-x").await;

    let mut socket = connect(&webui, "/api/logs?hosts=x").await;

    for expected in &frames {
        let envelope = decode_envelope(&next_text(&mut socket, Duration::from_secs(5)).await);
        assert_eq!(envelope.host, "x");
        assert_eq!(envelope.message, expected.as_bytes());
    }

    let closed = decode_envelope(&next_text(&mut socket, Duration::from_secs(5)).await);
    assert_eq!(closed.host, "x");
    assert_eq!(closed.message, b"websocket closed");

    expect_close(&mut socket, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn surviving_upstreams_keep_streaming_after_one_dies() {
    let webui = TestWebUi::spawn(Vec::new()).await;
    let adapter_x = MockAdapter::start().await;
    let adapter_y = MockAdapter::start().await;

    webui.overlay.register("adapter-x", adapter_x.addr());
    webui.overlay.register("adapter-y", adapter_y.addr());
    webui.directory.store("x", "adapter-x").await;
    webui.directory.store("y", "adapter-y").await;

    let mut socket = connect(&webui, "/api/logs?hosts=x,y").await;
    adapter_x.wait_for_ws_connections(1).await;
    adapter_y.wait_for_ws_connections(1).await;

    // Both upstreams are live; wait until a frame from each arrives.
    adapter_x.push_ws_frame("from-x-1");
    adapter_y.push_ws_frame("from-y-1");
    let mut seen = Vec::new();
    for _ in 0..2 {
        let envelope = decode_envelope(&next_text(&mut socket, Duration::from_secs(5)).await);
        seen.push(envelope.host.clone());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec!["x", "y"]);

    // Kill y; the client learns which host dropped.
    adapter_y.abort();
    let closed = decode_envelope(&next_text(&mut socket, Duration::from_secs(10)).await);
    assert_eq!(closed.host, "y");
    assert_eq!(closed.message, b"websocket closed");

    // x is unaffected.
    adapter_x.push_ws_frame("from-x-2");
    let envelope = decode_envelope(&next_text(&mut socket, Duration::from_secs(5)).await);
    assert_eq!(envelope.host, "x");
    assert_eq!(envelope.message, b"from-x-2");

    // Killing the last upstream closes the client normally.
    adapter_x.abort();
    let closed = decode_envelope(&next_text(&mut socket, Duration::from_secs(10)).await);
    assert_eq!(closed.host, "x");
    expect_close(&mut socket, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn client_text_ping_is_answered_with_text_pong() {
    let webui = TestWebUi::spawn(Vec::new()).await;
    let adapter = MockAdapter::start().await;

    webui.overlay.register("adapter-x", adapter.addr());
    webui.directory.store("x", "adapter-x").await;

    let mut socket = connect(&webui, "/api/busevents?hosts=x").await;
    socket
        .send(Message::Text("ping".into()))
        .await
        .expect("client ping should send");

    let reply = next_text(&mut socket, Duration::from_secs(5)).await;
    assert_eq!(reply, "pong");
}

#[tokio::test]
async fn unknown_target_closes_the_client_normally() {
    let webui = TestWebUi::spawn(Vec::new()).await;

    let mut socket = connect(&webui, "/api/logs?hosts=ghost").await;
    expect_close(&mut socket, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn ws_base_cancellation_closes_client_and_upstreams() {
    let webui = TestWebUi::spawn(Vec::new()).await;
    let adapter = MockAdapter::start().await;

    webui.overlay.register("adapter-x", adapter.addr());
    webui.directory.store("x", "adapter-x").await;

    let mut socket = connect(&webui, "/api/logs?hosts=x").await;
    // Let the session tasks start before cancelling.
    adapter.wait_for_ws_connections(1).await;
    adapter.push_ws_frame("warmup");
    let _ = next_text(&mut socket, Duration::from_secs(5)).await;

    webui.cancel_ws_base();
    expect_close(&mut socket, Duration::from_secs(6)).await;

    // Every tracked task exits once the base is cancelled.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
    webui
        .ws
        .shutdown(deadline)
        .await
        .expect("aggregation tasks should drain after base cancellation");
}

#[tokio::test]
async fn json_payloads_survive_the_envelope_byte_for_byte() {
    let webui = TestWebUi::spawn(Vec::new()).await;
    let adapter = MockAdapter::start().await;
    let event = json!({"kind": "bus", "payload": {"n": 7}}).to_string();
    adapter.set_ws_frames(vec![event.clone()]);
    adapter.set_ws_after(WsAfter::CloseNormally);

    webui.overlay.register("adapter-x", adapter.addr());
    webui.directory.store("x", "adapter-x").await;

    let mut socket = connect(&webui, "/api/busevents?hosts=x").await;
    let envelope = decode_envelope(&next_text(&mut socket, Duration::from_secs(5)).await);
    assert_eq!(envelope.host, "x");
    assert_eq!(envelope.message, event.as_bytes());
}
