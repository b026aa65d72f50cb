use serde::Deserialize;

fn default_vapid_subject() -> String {
    "mailto:admin@localhost".to_string()
}

fn default_push_ttl() -> u32 {
    86_400
}

/// Loads the VAPID private key from the `HERALD_VAPID_PRIVATE_KEY`
/// environment variable.
fn default_vapid_private_key_from_env() -> Option<String> {
    std::env::var("HERALD_VAPID_PRIVATE_KEY").ok().filter(|key| !key.is_empty())
}

/// Web Push signing and message settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Base64url-encoded VAPID private key (raw 32-byte P-256 scalar).
    #[serde(default = "default_vapid_private_key_from_env")]
    pub vapid_private_key: Option<String>,

    /// The `sub` claim of the VAPID JWT, usually a `mailto:` contact.
    #[serde(default = "default_vapid_subject")]
    pub vapid_subject: String,

    /// How long the push service should retain an undelivered message, in
    /// seconds.
    #[serde(default = "default_push_ttl")]
    pub ttl: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_private_key: None,
            vapid_subject: default_vapid_subject(),
            ttl: default_push_ttl(),
        }
    }
}
