use std::{net::SocketAddr, sync::Arc};

use herald::{
    config::{AppConfig, ServerConfig},
    context::{AppMetrics, LogBuffer},
    engine::{AppPipeline, Pipeline},
    push::PushTransport,
    registry::SubscriberRegistry,
    relay::RelaySource,
    test_helpers::{RecordingPushTransport, StaticRelaySource, create_test_repo},
};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::task;
use tokio_util::sync::CancellationToken;

pub const API_KEY: &str = "test-key";

pub fn create_test_server_config(address: &str, api_key: Option<&str>) -> AppConfig {
    let mut config = AppConfig::builder()
        .server(ServerConfig {
            enabled: true,
            listen_address: address.into(),
            api_key: api_key.map(str::to_string),
        })
        .build();
    config.notifications.app_url = Some("https://app.example.com".to_string());
    config
}

pub fn subscribe_body(id: &str, groups: &[&str]) -> Value {
    json!({
        "subscriberId": id,
        "pushEndpoint": format!("https://push.example.com/{id}"),
        "pushKeys": { "p256dh": "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA", "auth": "tBHItJI5svbpez7KI4CCXg" },
        "groups": groups,
    })
}

pub struct TestServer {
    pub address: SocketAddr,
    pub server_handle: task::JoinHandle<()>,
    pub client: Client,
    pub pipeline: Arc<AppPipeline>,
    pub transport: Arc<RecordingPushTransport>,
    shutdown: CancellationToken,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_api_key(Some(API_KEY)).await
    }

    pub async fn with_api_key(api_key: Option<&str>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get address");
        drop(listener); // Release port for the app to use

        let config = Arc::new(create_test_server_config(&addr.to_string(), api_key));

        let repo = create_test_repo().await;
        let registry = Arc::new(SubscriberRegistry::new(repo.clone()));
        let source: Arc<dyn RelaySource> = Arc::new(StaticRelaySource::new());
        let transport = Arc::new(RecordingPushTransport::new());
        let push: Arc<dyn PushTransport> = transport.clone();
        let pipeline = Arc::new(Pipeline::new(
            &config,
            repo,
            registry,
            source,
            push,
            AppMetrics::default(),
            LogBuffer::default(),
        ));

        let shutdown = CancellationToken::new();
        let server_pipeline = pipeline.clone();
        let token = shutdown.clone();
        let server_handle = task::spawn(async move {
            herald::http_server::run_server_from_config(config, server_pipeline, token)
                .await
                .expect("Server failed");
        });

        // Wait for server to start
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        Self { address: addr, server_handle, client: Client::new(), pipeline, transport, shutdown }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        let url = format!("http://{}{}", self.address, path);
        self.client.get(&url).send().await.expect("Request failed")
    }

    pub async fn get_authed(&self, path: &str) -> reqwest::Response {
        let url = format!("http://{}{}", self.address, path);
        self.client.get(&url).bearer_auth(API_KEY).send().await.expect("Request failed")
    }

    pub async fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("http://{}{}", self.address, path);
        self.client.post(&url)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.post(path).await.json(body).send().await.expect("Request failed")
    }

    pub async fn subscribe(&self, id: &str, groups: &[&str]) {
        let resp = self.post_json("/subscribe", &subscribe_body(id, groups)).await;
        assert_eq!(resp.status(), 200, "subscribe {id} failed");
    }

    pub fn cleanup(self) {
        self.shutdown.cancel();
        self.server_handle.abort();
    }
}
