//! Streaming endpoints: `/logs` and `/busevents`.
//!
//! Each connection runs three tasks through the WS manager so the socket
//! outlives the upgrade request but still honors process shutdown:
//! - reader: watches the client socket for close or read-deadline expiry
//!   and signals death to the others;
//! - writer: owns the socket's write half and drains the message channel;
//! - pump: follows the daemon stream, splits it into lines, and feeds the
//!   message channel. Pump errors push a normal close frame through the
//!   channel so the client sees a clean shutdown.

use crate::local_api::LocalApi;
use crate::AdapterState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use bytes::Bytes;
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use ts_core::localapi::LocalApiError;
use ts_core::RequestTrace;
use ts_proto::{PING_PONG_TIMEOUT, WS_WRITE_TIMEOUT};

const MESSAGE_BUFFER: usize = 16;

#[derive(Clone, Copy)]
enum Source {
    Logs,
    BusEvents,
}

pub async fn logs(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_to_socket(state, trace, socket, Source::Logs))
}

pub async fn bus_events(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_to_socket(state, trace, socket, Source::BusEvents))
}

async fn stream_to_socket(
    state: AdapterState,
    trace: RequestTrace,
    socket: WebSocket,
    source: Source,
) {
    let (sink, stream) = socket.split();
    let (death_tx, death_rx) = watch::channel(false);
    let (msg_tx, msg_rx) = mpsc::channel::<Message>(MESSAGE_BUFFER);

    let reader_trace = trace.clone();
    let reader_death = death_tx.clone();
    state.ws.run(move |shutdown| {
        socket_reader(stream, reader_death, death_rx.clone(), shutdown, reader_trace)
    });

    let writer_trace = trace.clone();
    let writer_death_rx = death_tx.subscribe();
    let pump_death_rx = death_tx.subscribe();
    state.ws.run(move |shutdown| {
        socket_writer(
            sink,
            msg_rx,
            death_tx,
            writer_death_rx,
            shutdown,
            writer_trace,
        )
    });

    let local = state.local.clone();
    state
        .ws
        .run(move |shutdown| source_pump(local, source, msg_tx, pump_death_rx, shutdown, trace));
}

/// Read for a close frame or silence. The WebUI pings every 5 s; a read that
/// sees nothing for the full ping-pong window means the peer is gone.
async fn socket_reader(
    mut stream: SplitStream<WebSocket>,
    death_tx: watch::Sender<bool>,
    mut death_rx: watch::Receiver<bool>,
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
            changed = death_rx.changed() => {
                if changed.is_err() || *death_rx.borrow() {
                    return;
                }
            }
            read = tokio::time::timeout(PING_PONG_TIMEOUT, stream.next()) => {
                match read {
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        info!(trace_id = %trace.trace_id, "stream client closed");
                        let _ = death_tx.send(true);
                        return;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        error!(trace_id = %trace.trace_id, error = %e, "stream client read error");
                        let _ = death_tx.send(true);
                        return;
                    }
                    Err(_) => {
                        info!(trace_id = %trace.trace_id, "stream client read deadline expired");
                        let _ = death_tx.send(true);
                        return;
                    }
                }
            }
        }
    }
}

async fn socket_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut msg_rx: mpsc::Receiver<Message>,
    death_tx: watch::Sender<bool>,
    mut death_rx: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    trace: RequestTrace,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = tokio::time::timeout(WS_WRITE_TIMEOUT, sink.send(normal_close())).await;
                    return;
                }
            }
            changed = death_rx.changed() => {
                if changed.is_err() || *death_rx.borrow() {
                    return;
                }
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else { return };
                let is_close = matches!(msg, Message::Close(_));
                match tokio::time::timeout(WS_WRITE_TIMEOUT, sink.send(msg)).await {
                    Ok(Ok(())) => {
                        if is_close {
                            return;
                        }
                    }
                    Ok(Err(e)) => {
                        error!(trace_id = %trace.trace_id, error = %e, "stream client write error");
                        let _ = death_tx.send(true);
                        return;
                    }
                    Err(_) => {
                        error!(trace_id = %trace.trace_id, "stream client write deadline expired");
                        let _ = death_tx.send(true);
                        return;
                    }
                }
            }
        }
    }
}

/// Follow the daemon stream and emit one text frame per line.
async fn source_pump(
    local: Arc<dyn LocalApi>,
    source: Source,
    msg_tx: mpsc::Sender<Message>,
    mut death_rx: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    trace: RequestTrace,
) {
    let opened: Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError> =
        match source {
            Source::Logs => local.tail_daemon_logs().await,
            Source::BusEvents => local.stream_bus_events().await,
        };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to open daemon stream");
            let _ = msg_tx.send(normal_close()).await;
            return;
        }
    };

    let mut pending = Vec::new();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            changed = death_rx.changed() => {
                if changed.is_err() || *death_rx.borrow() {
                    return;
                }
            }
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(chunk)) => {
                        pending.extend_from_slice(&chunk);
                        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=pos).take(pos).collect();
                            let text = String::from_utf8_lossy(&line)
                                .trim_end_matches('\r')
                                .to_owned();
                            if text.is_empty() {
                                continue;
                            }
                            if msg_tx.send(Message::Text(text.into())).await.is_err() {
                                // Writer is gone; the socket is dead.
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(trace_id = %trace.trace_id, error = %e, "daemon stream error");
                        let _ = msg_tx.send(normal_close()).await;
                        return;
                    }
                    None => {
                        info!(trace_id = %trace.trace_id, "daemon stream ended");
                        let _ = msg_tx.send(normal_close()).await;
                        return;
                    }
                }
            }
        }
    }
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: axum::extract::ws::close_code::NORMAL,
        reason: "".into(),
    }))
}
