use std::sync::Arc;

use crate::{
    models::{Preferences, PushKeys},
    persistence::SqliteStateRepository,
    registry::SubscriptionRequest,
};

/// Creates an in-memory repository with migrations applied.
pub async fn create_test_repo() -> Arc<SqliteStateRepository> {
    let repo = SqliteStateRepository::new("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory db");
    repo.run_migrations().await.expect("Failed to run migrations");
    Arc::new(repo)
}

/// A subscription request for `subscriber_id` with a unique endpoint under
/// `https://push.example.com/`.
pub fn subscription_request(
    subscriber_id: &str,
    groups: &[&str],
    keywords: &[&str],
) -> SubscriptionRequest {
    SubscriptionRequest {
        subscriber_id: subscriber_id.to_string(),
        push_endpoint: format!("https://push.example.com/{subscriber_id}"),
        push_keys: PushKeys {
            p256dh: "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-Ts1XbjhazAkj7I99e8QcYP7DkM"
                .to_string(),
            auth: "tBHItJI5svbpez7KI4CCXg".to_string(),
        },
        preferences: Preferences::default(),
        groups: Some(groups.iter().map(|g| g.to_string()).collect()),
        keywords: Some(keywords.iter().map(|k| k.to_string()).collect()),
    }
}
