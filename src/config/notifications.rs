use std::time::Duration;

use serde::Deserialize;

use super::deserialize_duration_from_seconds;

fn default_rate_limit_max() -> u32 {
    10
}

fn default_rate_limit_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_excerpt_length() -> usize {
    140
}

fn default_urgent_keywords() -> Vec<String> {
    vec!["urgent".to_string(), "emergency".to_string()]
}

/// Gating and formatting policy applied by the aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPolicyConfig {
    /// Maximum number of normal-priority notifications per subscriber within
    /// one rate window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,

    /// Length of the rate window.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_rate_limit_window"
    )]
    pub rate_limit_window: Duration,

    /// Maximum number of characters of event content quoted in a payload.
    #[serde(default = "default_excerpt_length")]
    pub excerpt_length: usize,

    /// Keywords whose matches are delivered with high priority.
    #[serde(default = "default_urgent_keywords")]
    pub urgent_keywords: Vec<String>,

    /// Base URL of the web client, used to build click-through links.
    #[serde(default)]
    pub app_url: Option<String>,
}

impl Default for NotificationPolicyConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window: default_rate_limit_window(),
            excerpt_length: default_excerpt_length(),
            urgent_keywords: default_urgent_keywords(),
            app_url: None,
        }
    }
}

impl NotificationPolicyConfig {
    /// Returns true if the keyword belongs to the urgent set.
    pub fn is_urgent_keyword(&self, keyword: &str) -> bool {
        self.urgent_keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    }
}
