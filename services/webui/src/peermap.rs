//! `/api/peermap`: the whole overlay as a node-edge graph.
//!
//! Every known adapter reports its own view via `/status`; each entry in its
//! peer map becomes an edge `self -> peer` and a node keyed on the peer
//! hostname (any adapter's view of a peer is acceptable, last write wins).
//! An unreachable adapter is evicted from the directory so a stale entry
//! cannot pin a graph node.

use crate::WebUiState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use http::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::error;
use ts_core::RequestTrace;
use ts_proto::KnownPath;

/// Per-adapter budget; a slow adapter should not stall the whole graph.
const PER_ADAPTER_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Serialize)]
struct NodeGraph {
    hosts: Vec<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

#[derive(Default)]
struct AdapterView {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    failed: bool,
}

pub async fn peer_map(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
) -> Response {
    let known_adapters = state.directory.adapters().await;
    let deadline = Instant::now() + PER_ADAPTER_TIMEOUT;

    let mut slots = Vec::with_capacity(known_adapters.len());
    for adapter in known_adapters {
        let (tx, rx) = oneshot::channel();
        let client = state.client.clone();
        let trace = trace.clone();
        let slot_adapter = adapter.clone();
        tokio::spawn(async move {
            let _ = tx.send(fetch_view(&client, &trace, &slot_adapter, deadline).await);
        });
        slots.push((adapter, rx));
    }

    let mut edges = Vec::new();
    let mut merged_nodes: HashMap<String, Node> = HashMap::new();
    for (adapter, rx) in slots {
        let view = rx.await.unwrap_or_else(|_| AdapterView {
            failed: true,
            ..AdapterView::default()
        });
        if view.failed {
            // Self-heal: adapters come and go, stale entries must not linger.
            if let Err(e) = state.directory.delete_adapter(&adapter).await {
                error!(trace_id = %trace.trace_id, adapter = %adapter, error = %e, "failed to evict adapter");
            }
            continue;
        }
        edges.extend(view.edges);
        merged_nodes.extend(view.nodes);
    }

    Json(NodeGraph {
        hosts: state.directory.hosts().await,
        nodes: merged_nodes.into_values().collect(),
        edges,
    })
    .into_response()
}

async fn fetch_view(
    client: &crate::client::AdapterClient,
    trace: &RequestTrace,
    adapter: &str,
    deadline: Instant,
) -> AdapterView {
    let status_path = KnownPath::Status.adapter();
    let call = client.call_adapter(
        trace,
        Method::POST,
        adapter,
        &status_path,
        None,
    );
    let response = match tokio::time::timeout_at(deadline, call).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(trace_id = %trace.trace_id, adapter = %adapter, error = %e, "failed to call adapter, ignoring");
            return AdapterView {
                failed: true,
                ..AdapterView::default()
            };
        }
        Err(_) => {
            error!(trace_id = %trace.trace_id, adapter = %adapter, "adapter deadline exceeded, ignoring");
            return AdapterView {
                failed: true,
                ..AdapterView::default()
            };
        }
    };

    let status: Value = match serde_json::from_slice(&response.body) {
        Ok(status) => status,
        Err(e) => {
            error!(trace_id = %trace.trace_id, adapter = %adapter, error = %e, "failed to decode peermap response from adapter");
            return AdapterView {
                failed: true,
                ..AdapterView::default()
            };
        }
    };

    // Passthrough payloads are schemaless; a missing field empties the view
    // instead of failing the request.
    let mut view = AdapterView::default();
    let Some(hostname) = status.pointer("/Self/HostName").and_then(Value::as_str) else {
        return view;
    };
    let Some(peers) = status.get("Peer").and_then(Value::as_object) else {
        return view;
    };

    for peer in peers.values() {
        let Some(peer_hostname) = peer.get("HostName").and_then(Value::as_str) else {
            continue;
        };
        view.edges.push(Edge {
            id: format!("{}->{}", hostname, peer_hostname),
            source: hostname.to_owned(),
            target: peer_hostname.to_owned(),
        });
        view.nodes
            .entry(peer_hostname.to_owned())
            .or_insert_with(|| Node {
                id: peer_hostname.to_owned(),
                label: peer_hostname.to_owned(),
                data: peer.clone(),
            });
    }
    view
}
