//! Unary adapter handlers against a scripted LocalAPI.

mod common;

use common::TestAdapter;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use ts_proto::DnsHeader;

async fn post_json(url: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("request should complete");
    let status = response.status().as_u16();
    let body: Value = response.json().await.expect("response should be JSON");
    (status, body)
}

#[tokio::test]
async fn status_relays_the_daemon_snapshot_and_learns_peers() {
    let adapter = TestAdapter::spawn(true).await;
    let snapshot = json!({
        "Self": {"HostName": "test-host"},
        "Peer": {
            "nodekey:1": {"HostName": "peer-a", "TailscaleIPs": ["100.64.0.9"]},
        },
    });
    *adapter.local.status.lock().expect("status lock") = snapshot.clone();

    let (status, body) = post_json(&adapter.url("/status"), json!({})).await;

    assert_eq!(status, 200);
    assert_eq!(body, snapshot);
    assert_eq!(
        adapter.known_peers.ip_by_peer("peer-a").await,
        Some("100.64.0.9".parse().expect("ip"))
    );
}

#[tokio::test]
async fn ping_runs_count_times_and_reports_each_result() {
    let adapter = TestAdapter::spawn(true).await;
    adapter
        .known_peers
        .store_peer("peer-a", "100.64.0.9".parse().expect("ip"))
        .await;

    let (status, body) = post_json(
        &adapter.url("/ping"),
        json!({"target": "peer-a", "count": 3, "pingType": "disco", "delay": "5ms"}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body.as_array().expect("ping results").len(), 3);
    assert_eq!(adapter.local.ping_calls.load(Ordering::Acquire), 3);
}

#[tokio::test]
async fn ping_with_zero_count_returns_an_empty_list() {
    let adapter = TestAdapter::spawn(true).await;
    adapter
        .known_peers
        .store_peer("peer-a", "100.64.0.9".parse().expect("ip"))
        .await;

    let (status, body) = post_json(
        &adapter.url("/ping"),
        json!({"target": "peer-a", "count": 0, "pingType": "disco", "delay": "1s"}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body, json!([]));
    assert_eq!(adapter.local.ping_calls.load(Ordering::Acquire), 0);
}

#[tokio::test]
async fn ping_of_an_unknown_peer_is_a_server_error() {
    let adapter = TestAdapter::spawn(true).await;

    let response = reqwest::Client::new()
        .post(adapter.url("/ping"))
        .json(&json!({"target": "nobody", "count": 1, "pingType": "disco", "delay": "1s"}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 500);
}

#[tokio::test]
async fn ping_with_a_malformed_delay_is_a_bad_request() {
    let adapter = TestAdapter::spawn(true).await;

    let response = reqwest::Client::new()
        .post(adapter.url("/ping"))
        .json(&json!({"target": "peer-a", "count": 1, "pingType": "disco", "delay": "soon"}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn querydns_reports_answers_resolvers_and_header() {
    let adapter = TestAdapter::spawn(true).await;
    *adapter.local.dns_answer.lock().expect("dns lock") = adapter::local_api::DnsAnswer {
        header: DnsHeader {
            response_code: "NOERROR".to_owned(),
            ..DnsHeader::default()
        },
        responses: vec!["100.64.0.1".to_owned()],
        resolvers: vec!["100.100.100.100:53".to_owned()],
    };

    let (status, body) = post_json(
        &adapter.url("/querydns"),
        json!({"name": "peer-a.example.ts.net", "queryType": "A"}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["header"]["responseCode"], "NOERROR");
    assert_eq!(body["responses"], json!(["100.64.0.1"]));
    assert_eq!(body["resolvers"], json!(["100.100.100.100:53"]));
}

#[tokio::test]
async fn querydns_with_no_answers_says_so() {
    let adapter = TestAdapter::spawn(true).await;

    let (status, body) = post_json(
        &adapter.url("/querydns"),
        json!({"name": "missing.example", "queryType": "AAAA"}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["responses"], json!(["No answer."]));
}

#[tokio::test]
async fn goroutines_returns_the_raw_dump() {
    let adapter = TestAdapter::spawn(true).await;

    let response = reqwest::Client::new()
        .post(adapter.url("/goroutines"))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.bytes().await.expect("body"),
        "goroutine dump".as_bytes()
    );
}

#[tokio::test]
async fn pprof_returns_the_raw_profile() {
    let adapter = TestAdapter::spawn(true).await;

    let response = reqwest::Client::new()
        .post(adapter.url("/pprof"))
        .json(&json!({"type": "heap", "seconds": 0}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.bytes().await.expect("body"),
        "profile-bytes".as_bytes()
    );
}

#[tokio::test]
async fn healthz_answers_ok() {
    let adapter = TestAdapter::spawn(true).await;

    let response = reqwest::get(adapter.url("/healthz"))
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body"), "ok");
}
