//! Web Push delivery (RFC 8030) with aes128gcm payload encryption
//! (RFC 8291) and VAPID authentication (RFC 8292).

mod error;

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessageBuilder,
};

pub use error::PushError;

use crate::{
    config::PushConfig,
    models::{NotificationPayload, SubscriberRecord},
};

/// Largest JSON payload `web-push` encrypts into one message.
pub const MAX_PAYLOAD_BYTES: usize = 3052;

/// Where and how to reach one browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
}

impl From<&SubscriberRecord> for PushSubscription {
    fn from(record: &SubscriberRecord) -> Self {
        Self {
            endpoint: record.push_endpoint.clone(),
            p256dh: record.push_keys.p256dh.clone(),
            auth: record.push_keys.auth.clone(),
        }
    }
}

/// Sends one payload to one subscription.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Sends `payload` and returns the (2xx) status code on success.
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<u16, PushError>;
}

/// [`PushTransport`] over HTTP using the `web-push` crate for encryption
/// and signing.
pub struct WebPushTransport {
    client: reqwest::Client,
    vapid_private_key: String,
    vapid_subject: String,
    ttl: u32,
    timeout: Duration,
}

impl WebPushTransport {
    /// Creates a transport. Fails if the VAPID key is missing or does not
    /// decode as a P-256 private key.
    pub fn new(config: &PushConfig, timeout: Duration) -> Result<Self, PushError> {
        let vapid_private_key = config
            .vapid_private_key
            .clone()
            .ok_or_else(|| PushError::Signing("no VAPID private key configured".to_string()))?;

        // Decoding needs a subscription; the key itself is what is checked.
        let placeholder = SubscriptionInfo::new("https://localhost/", "", "");
        VapidSignatureBuilder::from_base64(&vapid_private_key, &placeholder)
            .map_err(|e| PushError::Signing(format!("invalid VAPID private key: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            vapid_private_key,
            vapid_subject: config.vapid_subject.clone(),
            ttl: config.ttl,
            timeout,
        })
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<u16, PushError> {
        let body = serde_json::to_vec(payload).map_err(|e| PushError::Encoding(e.to_string()))?;

        let sub_info =
            SubscriptionInfo::new(&subscription.endpoint, &subscription.p256dh, &subscription.auth);

        let mut sig_builder = VapidSignatureBuilder::from_base64(&self.vapid_private_key, &sub_info)
            .map_err(|e| PushError::Signing(e.to_string()))?;
        sig_builder.add_claim("sub", self.vapid_subject.as_str());
        let signature = sig_builder.build().map_err(|e| PushError::Signing(e.to_string()))?;

        let mut builder = WebPushMessageBuilder::new(&sub_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &body);
        builder.set_vapid_signature(signature);
        builder.set_ttl(self.ttl);
        let message = builder.build().map_err(|e| match e {
            WebPushError::InvalidCryptoKeys | WebPushError::MissingCryptoKeys | WebPushError::InvalidUri => {
                PushError::MalformedSubscription(e.to_string())
            }
            WebPushError::PayloadTooLarge => PushError::PayloadTooLarge { size: body.len() },
            other => PushError::Encoding(other.to_string()),
        })?;

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .timeout(self.timeout)
            .header("TTL", message.ttl.to_string());

        if let Some(urgency) = message.urgency {
            request = request.header("Urgency", urgency.to_string());
        }

        if let Some(topic) = message.topic {
            request = request.header("Topic", topic);
        }

        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");

            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }

            request = request.body(push_payload.content);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() { PushError::Timeout } else { PushError::Network(e.to_string()) }
        })?;
        let status = response.status().as_u16();

        match status {
            200..=299 => Ok(status),
            404 | 410 => Err(PushError::InvalidSubscription { status }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(PushError::Rejected { status, body })
            }
        }
    }
}
