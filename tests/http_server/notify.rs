use serde_json::json;

use crate::helpers::*;

#[tokio::test]
async fn notify_enqueues_synthetic_trigger() {
    let server = TestServer::new().await;
    server.subscribe("u1", &["groupX"]).await;

    let resp = server
        .post("/notify")
        .await
        .bearer_auth(API_KEY)
        .json(&json!({
            "subscriberId": "u1",
            "notification": {
                "type": "group_activity",
                "groupId": "groupX",
                "author": "someone",
                "content": "hello   there",
            },
        }))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["queued"], 1);

    // The queue is drained right away rather than on the next tick.
    let sent = server.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].endpoint, "https://push.example.com/u1");
    assert_eq!(sent[0].payload.title, "New activity in your group");
    assert_eq!(sent[0].payload.body, "hello there");
    assert_eq!(sent[0].payload.data["url"], "https://app.example.com/groups/groupX");
    assert_eq!(server.pipeline.queue().depth().await.unwrap(), 0);

    server.cleanup();
}

#[tokio::test]
async fn notify_keeps_failed_push_queued_for_retry() {
    let server = TestServer::new().await;
    server.subscribe("u1", &[]).await;
    server.transport.respond_with(&[503]);

    let resp = server
        .post("/notify")
        .await
        .bearer_auth(API_KEY)
        .json(&json!({
            "subscriberId": "u1",
            "notification": { "type": "mention", "priority": "high", "content": "ping" },
        }))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(resp.status(), 202);
    assert_eq!(server.transport.sent().len(), 1);
    let items = server.pipeline.queue().items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 1);

    server.cleanup();
}

#[tokio::test]
async fn notify_reports_filtered_trigger() {
    let server = TestServer::new().await;
    server.subscribe("u1", &[]).await;

    // Reactions are off by default.
    let resp = server
        .post("/notify")
        .await
        .bearer_auth(API_KEY)
        .json(&json!({
            "subscriberId": "u1",
            "notification": { "type": "reaction", "content": "+" },
        }))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(resp.status(), 204);
    assert_eq!(server.pipeline.queue().depth().await.unwrap(), 0);

    server.cleanup();
}

#[tokio::test]
async fn notify_rejects_unknown_subscriber_and_missing_auth() {
    let server = TestServer::new().await;
    let body = json!({
        "subscriberId": "ghost",
        "notification": { "type": "mention", "content": "hi" },
    });

    let resp = server.post_json("/notify", &body).await;
    assert_eq!(resp.status(), 401);

    let resp = server
        .post("/notify")
        .await
        .bearer_auth(API_KEY)
        .json(&body)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), 404);

    server.cleanup();
}

#[tokio::test]
async fn test_notification_is_sent_immediately() {
    let server = TestServer::new().await;
    server.subscribe("u1", &[]).await;

    let resp = server
        .post_json("/test-notification", &json!({ "subscriberId": "u1", "message": "ping" }))
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);
    assert_eq!(body["statusCode"], 201);

    let sent = server.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.title, "Test notification");
    assert_eq!(sent[0].payload.body, "ping");
    assert_eq!(server.pipeline.queue().depth().await.unwrap(), 0);

    server.cleanup();
}

#[tokio::test]
async fn test_notification_to_expired_subscription_removes_it() {
    let server = TestServer::new().await;
    server.subscribe("u1", &["groupX"]).await;
    server.transport.respond_with(&[410]);

    let resp = server.post_json("/test-notification", &json!({ "subscriberId": "u1" })).await;

    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 410);
    assert!(server.pipeline.registry().get("u1").await.unwrap().is_none());

    server.cleanup();
}

#[tokio::test]
async fn test_notification_to_unknown_subscriber_is_not_found() {
    let server = TestServer::new().await;

    let resp = server.post_json("/test-notification", &json!({ "subscriberId": "ghost" })).await;
    assert_eq!(resp.status(), 404);
    assert!(server.transport.sent().is_empty());

    server.cleanup();
}
