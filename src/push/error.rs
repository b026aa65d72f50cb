use thiserror::Error;

/// Why a push could not be delivered.
#[derive(Debug, Error)]
pub enum PushError {
    /// The push service no longer knows the subscription (404/410).
    #[error("Subscription is no longer valid (HTTP {status})")]
    InvalidSubscription {
        /// Response status.
        status: u16,
    },

    /// The subscriber's keys or endpoint cannot be used for encryption.
    #[error("Subscription keys are malformed: {0}")]
    MalformedSubscription(String),

    /// The push service answered with an unexpected status.
    #[error("Push service returned HTTP {status}: {body}")]
    Rejected {
        /// Response status.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The request did not complete within the send timeout.
    #[error("Push request timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("Push request failed: {0}")]
    Network(String),

    /// The VAPID signature could not be produced.
    #[error("Failed to sign push request: {0}")]
    Signing(String),

    /// The encoded payload exceeds what one push message can carry.
    #[error("Payload too large for a push message ({size} bytes)")]
    PayloadTooLarge {
        /// Size of the JSON payload.
        size: usize,
    },

    /// The payload could not be encoded or encrypted.
    #[error("Failed to encode push payload: {0}")]
    Encoding(String),
}

impl PushError {
    /// True for failures that will never succeed for this subscription.
    pub fn is_invalid_subscription(&self) -> bool {
        matches!(self, PushError::InvalidSubscription { .. } | PushError::MalformedSubscription(_))
    }

    /// False for failures that will fail the same way on every attempt
    /// but say nothing about the subscription.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PushError::PayloadTooLarge { .. } | PushError::Encoding(_))
    }

    /// HTTP status of the response, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PushError::InvalidSubscription { status } | PushError::Rejected { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Low-cardinality key used to count failures.
    pub fn reason(&self) -> String {
        match self {
            PushError::InvalidSubscription { .. } | PushError::MalformedSubscription(_) => {
                "invalid_subscription".to_string()
            }
            PushError::Rejected { status, .. } => format!("http_{status}"),
            PushError::Timeout => "timeout".to_string(),
            PushError::Network(_) => "network".to_string(),
            PushError::Signing(_) => "signing".to_string(),
            PushError::PayloadTooLarge { .. } => "payload_too_large".to_string(),
            PushError::Encoding(_) => "encoding".to_string(),
        }
    }
}
