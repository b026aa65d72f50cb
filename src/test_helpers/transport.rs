//! A push transport that records sends instead of performing them.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    models::NotificationPayload,
    push::{MAX_PAYLOAD_BYTES, PushError, PushSubscription, PushTransport},
};

/// One send seen by [`RecordingPushTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPush {
    /// Endpoint the payload was addressed to.
    pub endpoint: String,
    /// The payload.
    pub payload: NotificationPayload,
}

/// Answers each send with the next scripted status code, or 201 once the
/// script runs out. 404 and 410 map to an invalid subscription, other
/// non-2xx codes to a rejection. Payloads over [`MAX_PAYLOAD_BYTES`] are
/// refused before the script is consulted.
#[derive(Debug, Clone, Default)]
pub struct RecordingPushTransport {
    script: Arc<Mutex<VecDeque<u16>>>,
    sent: Arc<Mutex<Vec<RecordedPush>>>,
}

impl RecordingPushTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues status codes for the next sends.
    pub fn respond_with(&self, statuses: &[u16]) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).extend(statuses);
    }

    /// Every send attempt so far, in order, including failed ones.
    pub fn sent(&self) -> Vec<RecordedPush> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PushTransport for RecordingPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<u16, PushError> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(RecordedPush {
            endpoint: subscription.endpoint.clone(),
            payload: payload.clone(),
        });

        let size = serde_json::to_vec(payload).map(|body| body.len()).unwrap_or_default();
        if size > MAX_PAYLOAD_BYTES {
            return Err(PushError::PayloadTooLarge { size });
        }

        let status = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front().unwrap_or(201);
        match status {
            200..=299 => Ok(status),
            404 | 410 => Err(PushError::InvalidSubscription { status }),
            _ => Err(PushError::Rejected { status, body: String::new() }),
        }
    }
}
