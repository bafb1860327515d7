//! Inbound Events API request classification.

use serde_json::Value;
use slack::{
    EventChallengeRequest, MessageEventRequest, APP_MENTION_EVENT_TYPE, EVENT_CALLBACK_TYPE,
    URL_VERIFICATION_TYPE,
};
use thiserror::Error;
use uuid::Uuid;

use crate::common::utils::body_content_hash;
use crate::kernel::event_queue::{DedupToken, OrderingKey, QueueError};

/// Synchronous ingress rejections. Everything here is returned to the caller
/// before (or instead of) an enqueue.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Queue unreachable. The caller may retry; nothing is retried here.
    #[error("enqueue unavailable: {0}")]
    EnqueueUnavailable(String),

    /// Queue rejected the write for a reason a retry will not fix.
    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),
}

impl From<QueueError> for IngressError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Unavailable(_) => IngressError::EnqueueUnavailable(error.to_string()),
            QueueError::Storage(_) | QueueError::InvalidLease(_) => {
                IngressError::EnqueueFailed(error.to_string())
            }
        }
    }
}

/// What the ingress did with an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    Accepted(Uuid),
    Deduplicated(Uuid),
    /// Request URL handshake, answered inline.
    Challenge(String),
    /// Well-formed but not something we act on.
    Ignored,
}

/// A parsed request body.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    UrlVerification(EventChallengeRequest),
    AppMention(MessageEventRequest),
    Other { event_type: String },
}

impl InboundEvent {
    pub fn parse(body: &[u8]) -> Result<Self, IngressError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| IngressError::MalformedEvent(format!("body is not JSON: {}", e)))?;

        let envelope_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| IngressError::MalformedEvent("missing envelope type".to_string()))?
            .to_string();

        match envelope_type.as_str() {
            URL_VERIFICATION_TYPE => serde_json::from_value(value)
                .map(InboundEvent::UrlVerification)
                .map_err(|e| IngressError::MalformedEvent(format!("bad challenge: {}", e))),
            EVENT_CALLBACK_TYPE => {
                let event_type = value
                    .get("event")
                    .and_then(|event| event.get("type"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| IngressError::MalformedEvent("missing event type".to_string()))?;

                if event_type != APP_MENTION_EVENT_TYPE {
                    return Ok(InboundEvent::Other {
                        event_type: event_type.to_string(),
                    });
                }

                serde_json::from_value(value)
                    .map(InboundEvent::AppMention)
                    .map_err(|e| IngressError::MalformedEvent(format!("bad app_mention: {}", e)))
            }
            _ => Ok(InboundEvent::Other {
                event_type: envelope_type,
            }),
        }
    }
}

/// Messages of one channel are answered in the order they arrived.
pub fn ordering_key_for(request: &MessageEventRequest) -> Result<OrderingKey, IngressError> {
    OrderingKey::new(request.event.channel.clone())
        .ok_or_else(|| IngressError::MalformedEvent("event has no channel".to_string()))
}

/// The envelope `event_id` when present (stable across Slack's retries),
/// otherwise a hash of the raw body.
pub fn dedup_token_for(
    request: &MessageEventRequest,
    body: &[u8],
) -> Result<DedupToken, IngressError> {
    request
        .event_id
        .as_deref()
        .and_then(DedupToken::new)
        .or_else(|| DedupToken::new(body_content_hash(body)))
        .ok_or_else(|| IngressError::MalformedEvent("no dedup token derivable".to_string()))
}
