use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::domains::slack_events::models::{
    dedup_token_for, ordering_key_for, InboundEvent, IngressError, IngressOutcome,
};
use crate::kernel::event_queue::EnqueueResult;
use crate::kernel::ServerDeps;

/// Raw webhook request: signature headers plus the untouched body.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub body: Bytes,
}

/// Verify, classify and enqueue one inbound event.
///
/// At most one enqueue per call and none on any validation failure. The body
/// is queued byte-for-byte so the consumer sees exactly what was signed.
pub async fn ingest_event(
    request: SignedRequest,
    deps: &ServerDeps,
) -> Result<IngressOutcome, IngressError> {
    let (Some(timestamp), Some(signature)) = (&request.timestamp, &request.signature) else {
        return Err(IngressError::Unauthorized(
            "missing signature headers".to_string(),
        ));
    };

    if !deps
        .signature_verifier
        .verify(timestamp, signature, &request.body)
    {
        return Err(IngressError::Unauthorized("signature mismatch".to_string()));
    }

    let event = match InboundEvent::parse(&request.body)? {
        InboundEvent::UrlVerification(challenge) => {
            info!("answering url_verification challenge");
            return Ok(IngressOutcome::Challenge(challenge.challenge));
        }
        InboundEvent::Other { event_type } => {
            debug!(event_type = %event_type, "ignoring unsupported event");
            return Ok(IngressOutcome::Ignored);
        }
        InboundEvent::AppMention(event) => event,
    };

    let ordering_key = ordering_key_for(&event)?;
    let dedup_token = dedup_token_for(&event, &request.body)?;

    let result = deps
        .queue
        .enqueue(request.body, ordering_key.clone(), dedup_token.clone())
        .await
        .map_err(|e| {
            warn!(ordering_key = %ordering_key, error = %e, "enqueue failed");
            IngressError::from(e)
        })?;

    match result {
        EnqueueResult::Accepted(id) => {
            info!(
                message_id = %id,
                ordering_key = %ordering_key,
                dedup_token = %dedup_token,
                "event enqueued"
            );
            Ok(IngressOutcome::Accepted(id))
        }
        EnqueueResult::Deduplicated(id) => {
            info!(
                message_id = %id,
                dedup_token = %dedup_token,
                "duplicate event dropped"
            );
            Ok(IngressOutcome::Deduplicated(id))
        }
    }
}
