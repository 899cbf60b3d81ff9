//! Peer-map aggregation and directory self-healing.

mod common;

use common::TestWebUi;
use serde_json::{json, Value};
use ts_test_utils::MockAdapter;

#[tokio::test]
async fn unreachable_adapter_is_evicted_and_live_edges_survive() {
    let webui = TestWebUi::spawn(Vec::new()).await;

    let live = MockAdapter::start().await;
    live.set_response(
        "status",
        json!({
            "Self": {"HostName": "alpha"},
            "Peer": {
                "nodekey:1": {"HostName": "beta", "Online": true},
                "nodekey:2": {"HostName": "gamma", "Online": false},
            },
        }),
    );

    let dead = MockAdapter::start().await;
    let dead_addr = dead.addr();
    dead.abort();
    drop(dead);

    webui.overlay.register("adapter-live", live.addr());
    webui.overlay.register("adapter-dead", dead_addr);
    webui.directory.store("alpha", "adapter-live").await;
    webui.directory.store("walking-ghost", "adapter-dead").await;

    let response = reqwest::get(webui.url("/api/peermap"))
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("response should be JSON");

    // Self-heal: the dead adapter is gone from the directory.
    assert_eq!(webui.directory.adapter_for("walking-ghost").await, None);
    assert_eq!(webui.directory.host_for("adapter-dead").await, None);

    let hosts = body["hosts"].as_array().expect("hosts array");
    assert_eq!(hosts, &vec![json!("alpha")]);

    let mut edges: Vec<(String, String)> = body["edges"]
        .as_array()
        .expect("edges array")
        .iter()
        .map(|e| {
            (
                e["source"].as_str().expect("source").to_owned(),
                e["target"].as_str().expect("target").to_owned(),
            )
        })
        .collect();
    edges.sort();
    assert_eq!(
        edges,
        vec![
            ("alpha".to_owned(), "beta".to_owned()),
            ("alpha".to_owned(), "gamma".to_owned()),
        ]
    );

    let mut node_ids: Vec<&str> = body["nodes"]
        .as_array()
        .expect("nodes array")
        .iter()
        .map(|n| n["id"].as_str().expect("node id"))
        .collect();
    node_ids.sort_unstable();
    assert_eq!(node_ids, vec!["beta", "gamma"]);
}

#[tokio::test]
async fn duplicate_peers_across_adapters_merge_into_one_node() {
    let webui = TestWebUi::spawn(Vec::new()).await;

    let first = MockAdapter::start().await;
    first.set_response(
        "status",
        json!({
            "Self": {"HostName": "alpha"},
            "Peer": {"nodekey:1": {"HostName": "shared"}},
        }),
    );
    let second = MockAdapter::start().await;
    second.set_response(
        "status",
        json!({
            "Self": {"HostName": "beta"},
            "Peer": {"nodekey:1": {"HostName": "shared"}},
        }),
    );

    webui.overlay.register("adapter-1", first.addr());
    webui.overlay.register("adapter-2", second.addr());
    webui.directory.store("alpha", "adapter-1").await;
    webui.directory.store("beta", "adapter-2").await;

    let body: Value = reqwest::get(webui.url("/api/peermap"))
        .await
        .expect("request should complete")
        .json()
        .await
        .expect("response should be JSON");

    let nodes = body["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes.len(), 1, "shared peer must merge into one node");
    assert_eq!(nodes[0]["id"], "shared");
    assert_eq!(body["edges"].as_array().expect("edges array").len(), 2);
}
