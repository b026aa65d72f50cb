use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use herald::{
    config::{AppConfig, NotificationPolicyConfig},
    context::{AppMetrics, LogBuffer},
    engine::Pipeline,
    models::{
        Event, Frequency, NotificationTrigger, PreferencesUpdate, Priority, QuietHours,
        TriggerType, kinds,
    },
    persistence::SqliteStateRepository,
    registry::SubscriberRegistry,
    relay::RelayPollStatus,
    test_helpers::{
        EventBuilder, RecordingPushTransport, StaticRelaySource, create_test_repo,
        subscription_request,
    },
};
use url::Url;

const RELAY_ONE: &str = "wss://relay.one";
const RELAY_TWO: &str = "wss://relay.two";

struct Harness {
    pipeline: Pipeline<SqliteStateRepository, StaticRelaySource, RecordingPushTransport>,
    source: Arc<StaticRelaySource>,
    transport: Arc<RecordingPushTransport>,
    relays: Vec<Url>,
}

impl Harness {
    async fn new() -> Self {
        Self::build(NotificationPolicyConfig::default(), 2).await
    }

    async fn with_policy(policy: NotificationPolicyConfig) -> Self {
        Self::build(policy, 2).await
    }

    /// Only the first `reachable` relays accept connections.
    async fn build(policy: NotificationPolicyConfig, reachable: usize) -> Self {
        let relays: Vec<Url> =
            [RELAY_ONE, RELAY_TWO].iter().map(|r| Url::parse(r).unwrap()).collect();
        let config = AppConfig::builder()
            .relays(relays.clone())
            .vapid_private_key("unused")
            .notifications(policy)
            .build();

        let repo = create_test_repo().await;
        let registry = Arc::new(SubscriberRegistry::new(repo.clone()));
        let source = Arc::new(StaticRelaySource::new());
        for relay in relays.iter().take(reachable) {
            source.add_relay(relay.as_str());
        }
        let transport = Arc::new(RecordingPushTransport::new());

        let pipeline = Pipeline::new(
            &config,
            repo,
            registry,
            source.clone(),
            transport.clone(),
            AppMetrics::default(),
            LogBuffer::default(),
        );
        Self { pipeline, source, transport, relays }
    }

    fn publish(&self, relay: usize, event: Event) {
        self.source.publish(self.relays[relay].as_str(), event);
    }

    async fn subscribe(&self, id: &str, groups: &[&str], keywords: &[&str]) {
        self.pipeline
            .registry()
            .subscribe(subscription_request(id, groups, keywords))
            .await
            .unwrap();
    }
}

fn trigger(id: &str, recipient: &str, priority: Priority) -> NotificationTrigger {
    NotificationTrigger {
        source_event_id: id.to_string(),
        trigger_type: TriggerType::GroupActivity,
        priority,
        target_subscriber_ids: vec![recipient.to_string()],
        group_id: Some("groupX".to_string()),
        keyword: None,
        author: "someone".to_string(),
        excerpt: "hello".to_string(),
        timestamp: Utc::now(),
    }
}

fn quiet_now(now: DateTime<Utc>) -> QuietHours {
    QuietHours { start_hour: now.hour(), end_hour: (now.hour() + 1) % 24, timezone: None }
}

#[tokio::test]
async fn group_post_notifies_every_member_except_the_author() {
    let harness = Harness::new().await;
    let author = EventBuilder::new().secret_key([9u8; 32]);
    harness.subscribe("u1", &["groupX"], &[]).await;
    harness.subscribe("u2", &["groupX"], &[]).await;
    harness.subscribe(&author.pubkey(), &["groupX"], &[]).await;

    let event = author
        .kind(kinds::GROUP_POST)
        .tag(&["a", "34550:pk:groupX"])
        .content("hello")
        .sign();

    let (extraction, triggers) = harness.pipeline.process_events(&[event]).await;
    assert_eq!(extraction.processed, 1);
    let report = harness.pipeline.dispatch(&triggers, Utc::now()).await.unwrap();
    assert_eq!(report.enqueued, 2);

    let mut recipients: Vec<String> = harness
        .pipeline
        .queue()
        .items()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.subscriber_id)
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["u1", "u2"]);
}

#[tokio::test]
async fn tick_delivers_group_post_to_members() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    harness.subscribe("u2", &["groupX"], &[]).await;
    harness.publish(
        0,
        EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).content("hi").sign(),
    );

    let report = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    assert_eq!(report.events_fetched, 1);
    assert_eq!(report.drain.delivered, 2);
    assert_eq!(harness.pipeline.queue().depth().await.unwrap(), 0);

    let mut endpoints: Vec<String> =
        harness.transport.sent().into_iter().map(|push| push.endpoint).collect();
    endpoints.sort();
    assert_eq!(
        endpoints,
        vec!["https://push.example.com/u1", "https://push.example.com/u2"]
    );
    let metrics = harness.pipeline.metrics().snapshot().await;
    assert_eq!(metrics.succeeded, 2);
    assert_eq!(metrics.events_processed, 1);
}

#[tokio::test]
async fn event_seen_on_two_relays_is_processed_once() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    let event = EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).sign();
    harness.publish(0, event.clone());
    harness.publish(1, event);

    let report = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    assert_eq!(report.events_fetched, 1);
    assert_eq!(report.relays.len(), 2);
    assert_eq!(harness.transport.sent().len(), 1);
}

#[tokio::test]
async fn repeated_ticks_do_not_renotify() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    harness.publish(0, EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).sign());

    harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();
    let second = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    // The relay returns the event again since it sits on the watermark.
    assert_eq!(second.extraction.duplicates, 1);
    assert_eq!(second.triggers, 0);
    assert_eq!(harness.transport.sent().len(), 1);
}

#[tokio::test]
async fn failing_relay_does_not_block_the_others() {
    let harness = Harness::build(NotificationPolicyConfig::default(), 1).await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    harness.publish(0, EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).sign());

    let report = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    assert!(matches!(report.relays[0].status, RelayPollStatus::Complete { .. }));
    assert!(matches!(report.relays[1].status, RelayPollStatus::Failed(_)));
    assert_eq!(report.drain.delivered, 1);
    assert_eq!(harness.source.fetches().len(), 2);
}

#[tokio::test]
async fn tampered_event_is_discarded() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    let mut event = EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).sign();
    event.content = "forged".to_string();
    harness.publish(0, event);

    let report = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    assert_eq!(report.extraction.invalid, 1);
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn rate_limit_holds_back_normal_but_not_high_priority() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    let now = Utc::now();

    for i in 0..10 {
        let report = harness
            .pipeline
            .dispatch(&[trigger(&format!("e{i}"), "u1", Priority::Normal)], now)
            .await
            .unwrap();
        assert_eq!(report.enqueued, 1);
    }

    let eleventh =
        harness.pipeline.dispatch(&[trigger("e10", "u1", Priority::Normal)], now).await.unwrap();
    assert_eq!(eleventh.enqueued, 0);
    assert_eq!(eleventh.filtered, 1);

    let twelfth =
        harness.pipeline.dispatch(&[trigger("e11", "u1", Priority::High)], now).await.unwrap();
    assert_eq!(twelfth.enqueued, 1);
    assert_eq!(harness.pipeline.queue().depth().await.unwrap(), 11);
}

#[tokio::test]
async fn triggers_for_one_recipient_become_one_summary() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;

    let mut mention = trigger("e2", "u1", Priority::Normal);
    mention.trigger_type = TriggerType::Mention;
    let triggers =
        vec![trigger("e1", "u1", Priority::Normal), mention, trigger("e3", "u1", Priority::Normal)];

    let report = harness.pipeline.dispatch(&triggers, Utc::now()).await.unwrap();
    assert_eq!(report.enqueued, 1);

    let items = harness.pipeline.queue().items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].payload.title, "3 new notifications");
    assert_eq!(items[0].payload.body, "1 mention, 2 group updates");
    assert_eq!(items[0].payload.data["type"], "summary");
}

#[tokio::test]
async fn quiet_hours_filter_normal_priority() {
    let harness = Harness::new().await;
    let now = Utc::now();
    let mut request = subscription_request("u1", &["groupX"], &[]);
    request.preferences.quiet_hours = Some(quiet_now(now));
    harness.pipeline.registry().subscribe(request).await.unwrap();

    let normal =
        harness.pipeline.dispatch(&[trigger("e1", "u1", Priority::Normal)], now).await.unwrap();
    assert_eq!(normal.filtered, 1);

    let high = harness.pipeline.dispatch(&[trigger("e2", "u1", Priority::High)], now).await.unwrap();
    assert_eq!(high.enqueued, 1);
}

#[tokio::test]
async fn disabled_category_is_never_delivered() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    let update = PreferencesUpdate { group_activity: Some(false), ..Default::default() };
    harness.pipeline.registry().update_preferences("u1", &update).await.unwrap();

    harness.publish(0, EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).sign());
    let report = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    assert_eq!(report.triggers, 1);
    assert_eq!(report.dispatch.filtered, 1);
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn keyword_match_uses_keyword_title() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &[], &["bitcoin"]).await;
    harness.publish(0, EventBuilder::new().content("Bitcoin is up").sign());

    harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.title, "Keyword match: bitcoin");
    assert_eq!(sent[0].payload.body, "Bitcoin is up");
}

#[tokio::test]
async fn urgent_keyword_bypasses_quiet_hours() {
    let policy =
        NotificationPolicyConfig { urgent_keywords: vec!["fire".to_string()], ..Default::default() };
    let harness = Harness::with_policy(policy).await;
    let now = Utc::now();
    let mut request = subscription_request("u1", &[], &["fire", "smoke"]);
    request.preferences.quiet_hours = Some(quiet_now(now));
    harness.pipeline.registry().subscribe(request).await.unwrap();

    harness.publish(0, EventBuilder::new().content("smoke and fire downtown").sign());
    let report = harness.pipeline.run_tick(now).await.unwrap().unwrap();

    assert_eq!(report.triggers, 2);
    assert_eq!(report.dispatch.filtered, 1);
    assert_eq!(report.dispatch.enqueued, 1);
    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.title, "Keyword match: fire");
    assert_eq!(sent[0].payload.data["priority"], "high");
}

#[tokio::test]
async fn hourly_subscriber_receives_batch_after_window() {
    let harness = Harness::new().await;
    let mut request = subscription_request("u1", &["groupX"], &[]);
    request.preferences.frequency = Frequency::Hourly;
    harness.pipeline.registry().subscribe(request).await.unwrap();
    let now = Utc::now();

    let report = harness
        .pipeline
        .dispatch(
            &[trigger("e1", "u1", Priority::Normal), trigger("e2", "u1", Priority::Normal)],
            now,
        )
        .await
        .unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(harness.pipeline.queue().depth().await.unwrap(), 0);

    let early = harness.pipeline.run_tick(now + chrono::Duration::minutes(30)).await.unwrap();
    assert_eq!(early.unwrap().dispatch.enqueued, 0);

    let later = harness.pipeline.run_tick(now + chrono::Duration::minutes(61)).await.unwrap();
    assert_eq!(later.unwrap().dispatch.enqueued, 1);
    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.title, "2 new notifications");
}

#[tokio::test]
async fn large_hourly_digest_is_delivered_and_subscriber_kept() {
    let harness = Harness::new().await;
    let mut request = subscription_request("u1", &["groupX"], &[]);
    request.preferences.frequency = Frequency::Hourly;
    harness.pipeline.registry().subscribe(request).await.unwrap();
    let now = Utc::now();

    let triggers: Vec<NotificationTrigger> =
        (0..100).map(|i| trigger(&format!("{i:064x}"), "u1", Priority::Normal)).collect();
    assert_eq!(harness.pipeline.dispatch(&triggers, now).await.unwrap().deferred, 1);

    let report = harness.pipeline.run_tick(now + chrono::Duration::minutes(61)).await.unwrap().unwrap();

    assert_eq!(report.drain.delivered, 1);
    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.title, "100 new notifications");
    assert_eq!(sent[0].payload.data["count"], 100);
    assert!(harness.pipeline.registry().get("u1").await.unwrap().is_some());
}

#[tokio::test]
async fn transient_failure_is_retried_after_backoff() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    harness.transport.respond_with(&[500]);
    let now = Utc::now();
    harness.pipeline.dispatch(&[trigger("e1", "u1", Priority::Normal)], now).await.unwrap();

    let first = harness.pipeline.queue().drain(now).await.unwrap();
    assert_eq!(first.retried, 1);
    let items = harness.pipeline.queue().items().await.unwrap();
    assert_eq!(items[0].attempts, 1);
    assert_eq!(items[0].next_attempt_at, now + chrono::Duration::seconds(1));
    assert!(items[0].last_error.as_deref().unwrap().contains("500"));

    // Not due yet.
    let early = harness.pipeline.queue().drain(now).await.unwrap();
    assert_eq!(early.attempted, 0);

    let second = harness.pipeline.queue().drain(now + chrono::Duration::seconds(2)).await.unwrap();
    assert_eq!(second.delivered, 1);
    assert_eq!(harness.pipeline.queue().depth().await.unwrap(), 0);
    assert_eq!(harness.transport.sent().len(), 2);
}

#[tokio::test]
async fn item_is_dead_lettered_after_max_attempts() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &[]).await;
    harness.transport.respond_with(&[503, 503, 503]);
    let now = Utc::now();
    harness.pipeline.dispatch(&[trigger("e1", "u1", Priority::Normal)], now).await.unwrap();

    let queue = harness.pipeline.queue();
    assert_eq!(queue.drain(now).await.unwrap().retried, 1);
    assert_eq!(queue.drain(now + chrono::Duration::seconds(2)).await.unwrap().retried, 1);
    let last = queue.drain(now + chrono::Duration::seconds(10)).await.unwrap();

    assert_eq!(last.dead_lettered, 1);
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert!(harness.pipeline.registry().get("u1").await.unwrap().is_some());
    let metrics = harness.pipeline.metrics().snapshot().await;
    assert_eq!(metrics.failed, 3);
}

#[tokio::test]
async fn gone_subscription_is_removed() {
    let harness = Harness::new().await;
    harness.subscribe("u1", &["groupX"], &["bitcoin"]).await;
    harness.transport.respond_with(&[410]);
    harness.publish(0, EventBuilder::new().kind(kinds::GROUP_POST).tag(&["h", "groupX"]).sign());

    let report = harness.pipeline.run_tick(Utc::now()).await.unwrap().unwrap();

    assert_eq!(report.drain.invalid_subscriptions, 1);
    let registry = harness.pipeline.registry();
    assert!(registry.get("u1").await.unwrap().is_none());
    assert!(registry.list_group_members("groupX").await.unwrap().is_empty());
    assert!(registry.list_keyword_subscribers("bitcoin").await.unwrap().is_empty());
    assert_eq!(harness.pipeline.queue().depth().await.unwrap(), 0);
    assert_eq!(harness.pipeline.metrics().snapshot().await.invalid_subscriptions, 1);
}
