use serde_json::json;

use crate::helpers::*;

#[tokio::test]
async fn subscribe_registers_and_normalizes() {
    let server = TestServer::new().await;

    let mut body = subscribe_body("u1", &["groupX"]);
    body["keywords"] = json!([" Bitcoin "]);
    let resp = server.post_json("/subscribe", &body).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);
    assert_eq!(body["subscriberId"], "u1");

    let registry = server.pipeline.registry();
    assert_eq!(registry.list_group_members("groupX").await.unwrap(), vec!["u1"]);
    assert_eq!(registry.list_keyword_subscribers("bitcoin").await.unwrap(), vec!["u1"]);

    server.cleanup();
}

#[tokio::test]
async fn subscribe_rejects_missing_keys() {
    let server = TestServer::new().await;

    let mut body = subscribe_body("u1", &[]);
    body["pushKeys"]["auth"] = json!("");
    let resp = server.post_json("/subscribe", &body).await;

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], false);
    assert!(server.pipeline.registry().get("u1").await.unwrap().is_none());

    server.cleanup();
}

#[tokio::test]
async fn unsubscribe_removes_record_and_indices() {
    let server = TestServer::new().await;
    server.subscribe("u1", &["groupX"]).await;

    let resp = server.post_json("/unsubscribe", &json!({ "subscriberId": "u1" })).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);

    let registry = server.pipeline.registry();
    assert!(registry.get("u1").await.unwrap().is_none());
    assert!(registry.list_group_members("groupX").await.unwrap().is_empty());

    // A second unsubscribe is harmless.
    let resp = server.post_json("/unsubscribe", &json!({ "subscriberId": "u1" })).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], false);

    server.cleanup();
}

#[tokio::test]
async fn preferences_update_is_partial() {
    let server = TestServer::new().await;
    server.subscribe("u1", &["groupX"]).await;

    let resp = server
        .post_json(
            "/preferences",
            &json!({
                "subscriberId": "u1",
                "preferences": { "reactions": true, "frequency": "hourly", "groups": ["groupY"] },
            }),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let registry = server.pipeline.registry();
    let record = registry.get("u1").await.unwrap().unwrap();
    assert!(record.preferences.reactions);
    assert!(record.preferences.mentions);
    assert_eq!(record.preferences.frequency, herald::models::Frequency::Hourly);
    assert!(registry.list_group_members("groupX").await.unwrap().is_empty());
    assert_eq!(registry.list_group_members("groupY").await.unwrap(), vec!["u1"]);

    server.cleanup();
}

#[tokio::test]
async fn preferences_of_unknown_subscriber_is_not_found() {
    let server = TestServer::new().await;

    let resp = server
        .post_json("/preferences", &json!({ "subscriberId": "ghost", "preferences": {} }))
        .await;
    assert_eq!(resp.status(), 404);

    server.cleanup();
}

#[tokio::test]
async fn check_subscription_compares_endpoint() {
    let server = TestServer::new().await;
    server.subscribe("u1", &[]).await;

    let resp = server
        .post_json(
            "/subscription/check",
            &json!({ "subscriberId": "u1", "endpoint": "https://push.example.com/u1" }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["valid"], true);

    let resp = server
        .post_json(
            "/subscription/check",
            &json!({ "subscriberId": "u1", "endpoint": "https://push.example.com/other" }),
        )
        .await;
    assert_eq!(resp.status(), 404);

    server.cleanup();
}

#[tokio::test]
async fn subscriptions_listing_requires_auth() {
    let server = TestServer::new().await;
    server.subscribe("u1", &["groupX"]).await;
    server.subscribe("u2", &[]).await;

    assert_eq!(server.get("/subscriptions").await.status(), 401);

    let resp = server.get_authed("/subscriptions").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["u1"], json!(["groupX"]));
    assert_eq!(body["u2"], json!([]));

    server.cleanup();
}
