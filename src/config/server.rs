use serde::Deserialize;

/// Configuration for the subscription API server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Whether the HTTP server is started by the supervisor.
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    /// Address and port for the HTTP server to listen on.
    #[serde(default = "default_api_server_listen_address")]
    pub listen_address: String,

    /// Optional bearer credential for the administrative endpoints
    /// (`/subscriptions`, `/notify`, `/metrics`, `/logs`).
    /// If not set in config, falls back to `HERALD_API_KEY` env var.
    #[serde(rename = "api_key", default = "default_api_key_from_env")]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            listen_address: default_api_server_listen_address(),
            api_key: None,
        }
    }
}

fn default_server_enabled() -> bool {
    true
}

/// Provides the default value for listen_address.
fn default_api_server_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Loads the API key from the `HERALD_API_KEY` environment variable.
fn default_api_key_from_env() -> Option<String> {
    std::env::var("HERALD_API_KEY").ok().filter(|key| !key.is_empty())
}
