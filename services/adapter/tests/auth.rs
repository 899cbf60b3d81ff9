//! Overlay-identity gating: callers must carry the WebUI tag.

mod common;

use common::TestAdapter;
use serde_json::json;
use ts_core::overlay::WhoIs;

#[tokio::test]
async fn untagged_callers_are_forbidden() {
    let adapter = TestAdapter::spawn(false).await;
    adapter.overlay.set_whois(WhoIs {
        login_name: "someone@example.com".to_owned(),
        tags: Vec::new(),
    });

    let response = reqwest::Client::new()
        .post(adapter.url("/status"))
        .json(&json!({}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn webui_tagged_callers_are_admitted() {
    let adapter = TestAdapter::spawn(false).await;
    adapter.overlay.set_whois(WhoIs {
        login_name: "".to_owned(),
        tags: vec!["tag:tsymbiote-webui".to_owned()],
    });

    let response = reqwest::Client::new()
        .post(adapter.url("/status"))
        .json(&json!({}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn healthz_needs_no_identity() {
    let adapter = TestAdapter::spawn(false).await;
    adapter.overlay.set_whois(WhoIs {
        login_name: "".to_owned(),
        tags: Vec::new(),
    });

    let response = reqwest::get(adapter.url("/healthz"))
        .await
        .expect("request should complete");
    assert_eq!(response.status().as_u16(), 200);
}
