use chrono::Utc;
use herald::context::{LogEntry, LogLevel};

use crate::helpers::*;

fn entry(level: LogLevel, message: &str) -> LogEntry {
    LogEntry { timestamp: Utc::now(), level, message: message.to_string(), data: None, error: None }
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let server = TestServer::new().await;
    server.subscribe("u1", &["groupX", "groupY"]).await;

    let resp = server.get("/health").await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["subscribers"], 1);
    assert_eq!(body["groups"], 2);
    assert_eq!(body["queueDepth"], 0);

    server.cleanup();
}

#[tokio::test]
async fn metrics_require_the_api_key() {
    let server = TestServer::new().await;

    assert_eq!(server.get("/metrics").await.status(), 401);

    let resp = server.get_authed("/metrics").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["totalSent"], 0);
    assert_eq!(body["successRate"], 0.0);
    assert!(body["version"].is_string());

    server.cleanup();
}

#[tokio::test]
async fn admin_routes_are_closed_without_a_configured_key() {
    let server = TestServer::with_api_key(None).await;

    let resp = server
        .client
        .get(format!("http://{}/subscriptions", server.address))
        .bearer_auth("anything")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), 401);
    assert_eq!(server.get("/health").await.status(), 200);

    server.cleanup();
}

#[tokio::test]
async fn logs_endpoint_filters_by_level() {
    let server = TestServer::new().await;
    server.pipeline.logs().push(entry(LogLevel::Error, "relay exploded"));
    server.pipeline.logs().push(entry(LogLevel::Info, "tick done"));

    let resp = server.get_authed("/logs?level=error").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["message"], "relay exploded");

    let resp = server.get_authed("/logs?level=loud").await;
    assert_eq!(resp.status(), 400);

    server.cleanup();
}
