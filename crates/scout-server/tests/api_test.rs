//! Integration tests for the HTTP surface.
//!
//! These tests require a running server + NATS.
//! Run `docker compose up -d` and start scout-server before running them;
//! they skip themselves when the server is not reachable.

use serde_json::{json, Value};

const API_URL: &str = "http://localhost:3000";

async fn ensure_server() -> Option<reqwest::Client> {
    let client = reqwest::Client::new();
    match client.get(format!("{}/health/live", API_URL)).send().await {
        Ok(_) => Some(client),
        Err(_) => {
            println!("Skipping test: Server not running at {}", API_URL);
            None
        }
    }
}

#[tokio::test]
async fn submit_malformed_ipv4_is_rejected() {
    let Some(client) = ensure_server().await else { return };

    let resp = client
        .post(format!("{}/jobs", API_URL))
        .json(&json!({"target": "1.1.1.1.1", "services": ["GeoIP"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    let target_errors = body["errors"]["target"].as_array().unwrap();
    assert!(
        target_errors[0].as_str().unwrap().contains("IPv4"),
        "body: {body}"
    );
}

#[tokio::test]
async fn submit_unknown_service_is_rejected() {
    let Some(client) = ensure_server().await else { return };

    let resp = client
        .post(format!("{}/jobs", API_URL))
        .json(&json!({"target": "8.8.8.8", "services": ["Traceroute"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert!(body["errors"]["services"].is_array(), "body: {body}");
}

#[tokio::test]
async fn submit_empty_services_is_rejected() {
    let Some(client) = ensure_server().await else { return };

    let resp = client
        .post(format!("{}/jobs", API_URL))
        .json(&json!({"target": "8.8.8.8", "services": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let Some(client) = ensure_server().await else { return };

    let resp = client
        .get(format!(
            "{}/jobs/00000000-0000-0000-0000-00000000dead",
            API_URL
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn submit_and_poll_roundtrip() {
    let Some(client) = ensure_server().await else { return };

    let resp = client
        .post(format!("{}/jobs", API_URL))
        .json(&json!({"target": "8.8.8.8", "services": ["Ping", "ReverseDNS"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let body: Value = resp.json().await.unwrap();
    let job_id = body["jobId"].as_str().unwrap().to_string();

    // The job is visible as soon as the saga is created; poll briefly.
    let mut view: Option<Value> = None;
    for _ in 0..20 {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        let resp = client
            .get(format!("{}/jobs/{}", API_URL, job_id))
            .send()
            .await
            .unwrap();
        if resp.status() == 200 {
            view = Some(resp.json().await.unwrap());
            break;
        }
    }

    let view = view.expect("job view never became available");
    let status = view["status"].as_str().unwrap();
    assert!(
        status == "Processing" || status == "Completed",
        "view: {view}"
    );
}
