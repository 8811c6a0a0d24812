//! End-to-end replay tests: write a TestCase fixture to disk, load it,
//! bind a real socket with `axum::serve`, and drive it with `reqwest` —
//! the same path the binary takes, minus the subprocess split.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::time::Duration;
use vtcase_http::HeaderMap;
use vtcase_model::{Criterion, EndpointMap, RecordedResponse, ScanInfo, TestCaseStore};

async fn spawn_service(endpoints: EndpointMap) -> (u16, tokio::task::JoinHandle<()>) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("1.3.6.1.4.1.25623.1.0.1").join("TestCase1");
    let store = TestCaseStore::existing(dir.clone());
    let scan_info = ScanInfo::new(vec![0], vec!["1.3.6.1.4.1.25623.1.0.1".into()]);
    let mut services = IndexMap::new();
    services.insert("HTTP".to_string(), endpoints);
    store.write(&scan_info, &services).unwrap();

    let loaded = vtcase_emulator::loader::load(&dir, "127.0.0.1").await.unwrap();
    let router = vtcase_emulator::matcher::build(loaded);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    // leak the tempdir so the bound files outlive the spawned server task
    std::mem::forget(tmp);
    (port, handle)
}

#[tokio::test]
async fn replays_a_recorded_response_over_a_real_socket() {
    let mut endpoints = EndpointMap::new();
    let bucket = endpoints.method_bucket("/status", "GET");
    let idx = bucket.dedup_response(RecordedResponse {
        status: "200".into(),
        reason: "OK".into(),
        headers: HeaderMap::new(),
        body: b"recorded reply".to_vec(),
        body_file: None,
    });
    bucket.criteria.subset.push(Criterion {
        id: "GET1".into(),
        url_parameters: String::new(),
        headers: HeaderMap::new(),
        body: BTreeMap::new(),
        response_sequence: vec![idx],
    });

    let (port, _handle) = spawn_service(endpoints).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "recorded reply");
}

#[tokio::test]
async fn listener_accepts_connections_immediately_after_binding() {
    let (port, _handle) = spawn_service(EndpointMap::new()).await;

    let connected = tokio::time::timeout(
        Duration::from_millis(50),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{port}")),
    )
    .await;
    assert!(connected.is_ok(), "socket did not accept a connection within 50ms");
    assert!(connected.unwrap().is_ok());
}

#[tokio::test]
async fn user_agent_normalization_applies_to_both_request_and_criterion() {
    let mut endpoints = EndpointMap::new();
    let bucket = endpoints.method_bucket("/ua", "GET");
    let idx = bucket.dedup_response(RecordedResponse {
        status: "200".into(),
        reason: "OK".into(),
        headers: HeaderMap::new(),
        body: b"matched".to_vec(),
        body_file: None,
    });
    let mut criterion_headers = HeaderMap::new();
    criterion_headers.insert(
        "User-Agent".to_string(),
        vtcase_http::HeaderValue::Scalar("OpenVAS-VT 21.4.5".to_string()),
    );
    bucket.criteria.subset.push(Criterion {
        id: "GET1".into(),
        url_parameters: String::new(),
        headers: criterion_headers,
        body: BTreeMap::new(),
        response_sequence: vec![idx],
    });

    let (port, _handle) = spawn_service(endpoints).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{port}/ua"))
        .header("User-Agent", "OpenVAS-VT 22.9.0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "matched");
}
