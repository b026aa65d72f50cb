use std::time::Duration;

use serde::{Deserialize, Deserializer, de};
use url::Url;

/// Custom deserializer for Duration from milliseconds
pub fn deserialize_duration_from_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}

/// Custom deserializer for Duration from seconds
pub fn deserialize_duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Custom deserializer for a list of durations given in seconds, e.g. a
/// retry backoff schedule `[1, 5, 15]`.
pub fn deserialize_durations_from_seconds<'de, D>(
    deserializer: D,
) -> Result<Vec<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Vec::<u64>::deserialize(deserializer)?;
    Ok(secs.into_iter().map(Duration::from_secs).collect())
}

/// Custom deserializer for a vector of relay URLs.
///
/// Only `ws://` and `wss://` schemes are accepted.
pub fn deserialize_urls<'de, D>(deserializer: D) -> Result<Vec<Url>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Vec::<String>::deserialize(deserializer)?;
    s.into_iter()
        .map(|url_str| {
            let url = Url::parse(url_str.trim()).map_err(de::Error::custom)?;
            match url.scheme() {
                "ws" | "wss" => Ok(url),
                other => Err(de::Error::custom(format!(
                    "unsupported relay url scheme '{other}' in '{url_str}'"
                ))),
            }
        })
        .collect()
}
