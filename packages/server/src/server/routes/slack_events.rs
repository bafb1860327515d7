use axum::{
    body::Bytes,
    extract::Extension,
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use slack::{REQUEST_SIGNATURE_HEADER, REQUEST_TIMESTAMP_HEADER};
use tracing::warn;

use crate::domains::slack_events::{ingest_event, IngressError, IngressOutcome, SignedRequest};
use crate::server::app::AxumAppState;

/// Seconds a caller should wait before retrying after a queue outage.
const RETRY_AFTER_SECS: &str = "5";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Slack Events API webhook.
///
/// Acknowledges as soon as the event is durably queued; the answer is
/// produced later by the queue consumer.
pub async fn slack_events_handler(
    Extension(state): Extension<AxumAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = SignedRequest {
        timestamp: header_value(&headers, REQUEST_TIMESTAMP_HEADER),
        signature: header_value(&headers, REQUEST_SIGNATURE_HEADER),
        body,
    };

    match ingest_event(request, &state.deps).await {
        Ok(IngressOutcome::Challenge(challenge)) => {
            (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response()
        }
        Ok(_) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            IngressError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IngressError::EnqueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IngressError::EnqueueFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(status = %status, error = %self, "rejecting inbound event");

        let mut response = (
            status,
            Json(json!({ "success": false, "message": self.to_string() })),
        )
            .into_response();

        if matches!(self, IngressError::EnqueueUnavailable(_)) {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}
