//! The WebSocket aggregator: N upstream adapter sockets, one browser socket.
//!
//! Serves `/api/logs` and `/api/busevents`. Targets come from the comma-split
//! `?hosts=` query parameter; each target's upstream socket is owned by one
//! task that reads frames and executes ping/close commands from the central
//! writer, so control writes never race data writes. Channels:
//! - `msg` (buffered to the target count) carries frames bound for the
//!   client, so a burst of simultaneous upstream writes cannot deadlock the
//!   readers;
//! - `dead` (same capacity) carries the names of upstreams that have died;
//! - a client-death channel fans the client's demise out to every task.
//!
//! Terminal condition: no live upstreams left, or client death, or process
//! shutdown. Every planned teardown sends a normal close frame.
//!
//! Heartbeats are asymmetric: upstream adapters get protocol pings every
//! 5 s, while the browser (which cannot send protocol pings) speaks an
//! application-level text `"ping"`/`"pong"` handshake, and silence beyond
//! the ping-pong window kills the client socket.

use crate::WebUiState;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{error, info};
use ts_core::RequestTrace;
use ts_proto::{
    HostMessage, KnownPath, CLIENT_PING, CLIENT_PONG, PING_PONG_INTERVAL, PING_PONG_TIMEOUT,
    TRACE_ID_HEADER, USERNAME_HEADER, WEBSOCKET_CLOSED_MESSAGE, WS_WRITE_TIMEOUT,
};

type UpstreamSocket = WebSocketStream<TcpStream>;

const UPSTREAM_COMMAND_BUFFER: usize = 4;

enum UpstreamCommand {
    Ping,
    Close,
}

pub async fn logs(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    relative_websocket(state, trace, params, ws, KnownPath::Logs)
}

pub async fn bus_events(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    relative_websocket(state, trace, params, ws, KnownPath::BusEvents)
}

fn relative_websocket(
    state: WebUiState,
    trace: RequestTrace,
    params: HashMap<String, String>,
    ws: WebSocketUpgrade,
    path: KnownPath,
) -> Response {
    let targets: Vec<String> = params
        .get("hosts")
        .map(|raw| {
            raw.split(',')
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    ws.on_upgrade(move |socket| aggregate(state, trace, socket, path.adapter(), targets))
}

async fn aggregate(
    state: WebUiState,
    trace: RequestTrace,
    client: WebSocket,
    adapter_path: String,
    targets: Vec<String>,
) {
    let (mut client_sink, client_stream) = client.split();

    if targets.is_empty() {
        error!(trace_id = %trace.trace_id, "failed to find host query param, closing");
        close_client(&mut client_sink, &trace).await;
        return;
    }

    let (msg_tx, msg_rx) = mpsc::channel::<ws::Message>(targets.len());
    let (dead_tx, dead_rx) = mpsc::channel::<String>(targets.len());
    let (client_death_tx, client_death_rx) = watch::channel(false);

    let mut upstreams: HashMap<String, mpsc::Sender<UpstreamCommand>> = HashMap::new();
    for target in &targets {
        let adapter = match state.directory.adapter_for(target).await {
            Some(adapter) if !adapter.is_empty() => adapter,
            _ => {
                error!(trace_id = %trace.trace_id, host = %target, "failed to find adapter for host");
                abandon(&mut client_sink, &upstreams, &trace).await;
                return;
            }
        };

        let upstream = match dial_adapter(&state, &trace, &adapter, &adapter_path).await {
            Ok(upstream) => upstream,
            Err(e) => {
                error!(trace_id = %trace.trace_id, host = %target, error = %e, "failed to dial adapter");
                abandon(&mut client_sink, &upstreams, &trace).await;
                return;
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(UPSTREAM_COMMAND_BUFFER);
        upstreams.insert(target.clone(), cmd_tx);

        let task_target = target.clone();
        let task_msg_tx = msg_tx.clone();
        let task_dead_tx = dead_tx.clone();
        let task_trace = trace.clone();
        state.ws.run(move |shutdown| {
            upstream_reader(
                task_target,
                upstream,
                cmd_rx,
                task_msg_tx,
                task_dead_tx,
                shutdown,
                task_trace,
            )
        });
    }

    let reader_trace = trace.clone();
    let reader_msg_tx = msg_tx.clone();
    let reader_death_tx = client_death_tx.clone();
    let reader_death_rx = client_death_rx.clone();
    state.ws.run(move |shutdown| {
        client_reader(
            client_stream,
            reader_msg_tx,
            reader_death_tx,
            reader_death_rx,
            shutdown,
            reader_trace,
        )
    });

    state.ws.run(move |shutdown| {
        client_writer(
            client_sink,
            upstreams,
            msg_rx,
            dead_rx,
            client_death_tx,
            client_death_rx,
            shutdown,
            trace,
        )
    });
}

async fn dial_adapter(
    state: &WebUiState,
    trace: &RequestTrace,
    adapter: &str,
    adapter_path: &str,
) -> Result<UpstreamSocket, String> {
    let stream = state
        .overlay
        .dial(adapter, state.adapter_port)
        .await
        .map_err(|e| e.to_string())?;

    let url = format!("ws://{}:{}{}", adapter, state.adapter_port, adapter_path);
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    // Propagate trace-id and username to the downstream socket.
    if let Ok(value) = trace.trace_id.parse() {
        request.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    if let Ok(value) = trace.username.parse() {
        request.headers_mut().insert(USERNAME_HEADER, value);
    }

    let (upstream, _response) = tokio_tungstenite::client_async(request, stream)
        .await
        .map_err(|e| e.to_string())?;
    Ok(upstream)
}

/// One per adapter: forward frames to the client channel, wrapped in the
/// `{Host, Message}` envelope, and execute writer commands. Death is
/// reported on `dead_tx` exactly once, then the task exits.
async fn upstream_reader(
    target: String,
    mut upstream: UpstreamSocket,
    mut cmd_rx: mpsc::Receiver<UpstreamCommand>,
    msg_tx: mpsc::Sender<ws::Message>,
    dead_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
    trace: RequestTrace,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    close_upstream(&mut upstream).await;
                    return;
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UpstreamCommand::Ping) => {
                        let ping = upstream.send(UpstreamMessage::Ping(Vec::new().into()));
                        match tokio::time::timeout(WS_WRITE_TIMEOUT, ping).await {
                            Ok(Ok(())) => {}
                            _ => {
                                info!(trace_id = %trace.trace_id, host = %target, "adapter ping failed");
                                close_upstream(&mut upstream).await;
                                let _ = dead_tx.send(target).await;
                                return;
                            }
                        }
                    }
                    Some(UpstreamCommand::Close) | None => {
                        close_upstream(&mut upstream).await;
                        return;
                    }
                }
            }
            frame = upstream.next() => {
                let payload = match frame {
                    Some(Ok(UpstreamMessage::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(UpstreamMessage::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(UpstreamMessage::Close(_))) | None => {
                        info!(trace_id = %trace.trace_id, host = %target, "adapter websocket closed");
                        let _ = dead_tx.send(target).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!(trace_id = %trace.trace_id, host = %target, error = %e, "adapter read error");
                        let _ = dead_tx.send(target).await;
                        return;
                    }
                };

                let envelope = HostMessage {
                    host: target.clone(),
                    message: payload,
                };
                let frame = match serde_json::to_string(&envelope) {
                    Ok(json) => ws::Message::Text(json.into()),
                    Err(e) => {
                        error!(trace_id = %trace.trace_id, error = %e, "failed to marshal websocket message");
                        continue;
                    }
                };
                if msg_tx.send(frame).await.is_err() {
                    // Writer is gone; the session is over.
                    close_upstream(&mut upstream).await;
                    return;
                }
            }
        }
    }
}

/// The client's read half. Extends its read deadline one ping-pong window at
/// a time; the browser heartbeat (`"ping"` text) is answered through the
/// message channel. Any read failure is client death.
async fn client_reader(
    mut client: SplitStream<WebSocket>,
    msg_tx: mpsc::Sender<ws::Message>,
    client_death_tx: watch::Sender<bool>,
    mut client_death_rx: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    trace: RequestTrace,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            changed = client_death_rx.changed() => {
                if changed.is_err() || *client_death_rx.borrow() {
                    return;
                }
            }
            read = tokio::time::timeout(PING_PONG_TIMEOUT, client.next()) => {
                match read {
                    Ok(Some(Ok(ws::Message::Text(text)))) if text.as_str() == CLIENT_PING => {
                        if msg_tx.send(ws::Message::Text(CLIENT_PONG.into())).await.is_err() {
                            return;
                        }
                    }
                    Ok(Some(Ok(ws::Message::Close(_)))) | Ok(None) => {
                        info!(trace_id = %trace.trace_id, "client websocket closed");
                        let _ = client_death_tx.send(true);
                        return;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        error!(trace_id = %trace.trace_id, error = %e, "client read error");
                        let _ = client_death_tx.send(true);
                        return;
                    }
                    Err(_) => {
                        info!(trace_id = %trace.trace_id, "client read deadline expired");
                        let _ = client_death_tx.send(true);
                        return;
                    }
                }
            }
        }
    }
}

/// The central writer: owns the client's write half, pings adapters on a
/// ticker, relays frames, announces upstream deaths, and closes everything
/// on the way out.
#[allow(clippy::too_many_arguments)]
async fn client_writer(
    mut client: SplitSink<WebSocket, ws::Message>,
    mut living: HashMap<String, mpsc::Sender<UpstreamCommand>>,
    mut msg_rx: mpsc::Receiver<ws::Message>,
    mut dead_rx: mpsc::Receiver<String>,
    client_death_tx: watch::Sender<bool>,
    mut client_death_rx: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    trace: RequestTrace,
) {
    let mut ticker = tokio::time::interval(PING_PONG_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            // Biased so buffered frames drain before a death notice for the
            // same upstream: frames from one adapter stay ordered ahead of
            // its synthetic close.
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    close_upstreams(&living).await;
                    close_client(&mut client, &trace).await;
                    return;
                }
            }
            changed = client_death_rx.changed() => {
                if changed.is_err() || *client_death_rx.borrow() {
                    // Client is already gone; just release the adapters.
                    close_upstreams(&living).await;
                    return;
                }
            }
            msg = msg_rx.recv() => {
                let Some(mut msg) = msg else { return };
                // Safety net: never echo a raw "ping" back at the browser.
                if let ws::Message::Text(text) = &msg {
                    if text.as_str() == CLIENT_PING {
                        msg = ws::Message::Text(CLIENT_PONG.into());
                    }
                }
                if !write_client(&mut client, msg, &trace).await {
                    let _ = client_death_tx.send(true);
                }
            }
            dead = dead_rx.recv() => {
                let Some(adapter) = dead else { return };
                living.remove(&adapter);

                let envelope = HostMessage {
                    host: adapter,
                    message: WEBSOCKET_CLOSED_MESSAGE.to_vec(),
                };
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if !write_client(&mut client, ws::Message::Text(json.into()), &trace).await {
                            let _ = client_death_tx.send(true);
                        }
                    }
                    Err(e) => {
                        error!(trace_id = %trace.trace_id, error = %e, "failed to marshal websocket close message for client");
                    }
                }
            }
            _ = ticker.tick() => {
                // Liveness probe; a full command buffer just skips one round.
                for cmd in living.values() {
                    let _ = cmd.try_send(UpstreamCommand::Ping);
                }
            }
        }

        // No more adapters, kill the client.
        if living.is_empty() {
            close_client(&mut client, &trace).await;
            return;
        }
    }
}

async fn write_client(
    client: &mut SplitSink<WebSocket, ws::Message>,
    msg: ws::Message,
    trace: &RequestTrace,
) -> bool {
    match tokio::time::timeout(WS_WRITE_TIMEOUT, client.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(trace_id = %trace.trace_id, error = %e, "client write error");
            false
        }
        Err(_) => {
            error!(trace_id = %trace.trace_id, "client write deadline expired");
            false
        }
    }
}

async fn close_client(client: &mut SplitSink<WebSocket, ws::Message>, trace: &RequestTrace) {
    let close = ws::Message::Close(Some(ws::CloseFrame {
        code: ws::close_code::NORMAL,
        reason: "".into(),
    }));
    if let Ok(Err(e)) = tokio::time::timeout(WS_WRITE_TIMEOUT, client.send(close)).await {
        info!(trace_id = %trace.trace_id, error = %e, "client close failed");
    }
}

async fn close_upstreams(living: &HashMap<String, mpsc::Sender<UpstreamCommand>>) {
    for cmd in living.values() {
        let _ = cmd.send(UpstreamCommand::Close).await;
    }
}

async fn close_upstream(upstream: &mut UpstreamSocket) {
    let close = UpstreamMessage::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }));
    let _ = tokio::time::timeout(WS_WRITE_TIMEOUT, upstream.send(close)).await;
}

/// Dial-phase failure: release what was already connected and close the
/// client normally.
async fn abandon(
    client: &mut SplitSink<WebSocket, ws::Message>,
    upstreams: &HashMap<String, mpsc::Sender<UpstreamCommand>>,
    trace: &RequestTrace,
) {
    close_upstreams(upstreams).await;
    close_client(client, trace).await;
}
