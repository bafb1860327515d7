//! Test fixtures for building webhook requests.
//!
//! Bodies are shaped like real Events API deliveries and signed with the
//! same secret the test server is configured with.

use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;
use relay_core::kernel::event_queue::{DedupToken, OrderingKey};
use serde_json::json;
use slack::{compute_signature, REQUEST_SIGNATURE_HEADER, REQUEST_TIMESTAMP_HEADER};

pub const TEST_SIGNING_SECRET: &str = "test-signing-secret";

/// An `app_mention` event_callback body
pub fn app_mention_body(event_id: &str, channel: &str, text: &str) -> String {
    json!({
        "token": "legacy-token",
        "team_id": "T061EG9R6",
        "api_app_id": "A0PNCHHK2",
        "type": "event_callback",
        "event_id": event_id,
        "event_time": 1515449522,
        "event": {
            "type": "app_mention",
            "channel": channel,
            "user": "U061F7AUR",
            "text": text,
            "ts": "1515449522.000016",
            "event_ts": "1515449522.000016"
        }
    })
    .to_string()
}

pub fn url_verification_body(challenge: &str) -> String {
    json!({
        "token": "legacy-token",
        "type": "url_verification",
        "challenge": challenge
    })
    .to_string()
}

/// POST /slack/events signed for `secret` at the current time
pub fn signed_event_request(body: &str, secret: &str) -> Request<Body> {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature(secret, timestamp, body.as_bytes())
        .expect("test secret should be usable");

    Request::builder()
        .method("POST")
        .uri("/slack/events")
        .header("content-type", "application/json")
        .header(REQUEST_TIMESTAMP_HEADER, timestamp.to_string())
        .header(REQUEST_SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

/// POST /slack/events with no signature headers at all
pub fn unsigned_event_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/slack/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn key(value: &str) -> OrderingKey {
    OrderingKey::new(value).expect("non-blank ordering key")
}

pub fn token(value: &str) -> DedupToken {
    DedupToken::new(value).expect("non-blank dedup token")
}

pub fn payload(value: &str) -> Bytes {
    Bytes::from(value.to_string())
}
