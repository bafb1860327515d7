// https://api.slack.com/authentication/verifying-requests-from-slack

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SlackError;

pub const REQUEST_TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";
pub const REQUEST_SIGNATURE_HEADER: &str = "X-Slack-Signature";

const VERSION_NUMBER: &str = "v0";

/// Requests older (or newer) than this many seconds are rejected as replays.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 60 * 5;

type HmacSha256 = Hmac<Sha256>;

/// Compute the `v0=<hex>` signature Slack would send for `body` at `timestamp`.
pub fn compute_signature(
    signing_secret: &str,
    timestamp: i64,
    body: &[u8],
) -> Result<String, SlackError> {
    let mac = signed_mac(signing_secret, timestamp, body)?;
    Ok(format!(
        "{}={}",
        VERSION_NUMBER,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a request signature against the signing secret.
///
/// `now` is the local unix time in seconds. Returns `Ok(false)` for a stale
/// timestamp or a signature mismatch; `Err` only when the secret is unusable.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: i64,
    body: &[u8],
    received_signature: &str,
    now: i64,
) -> Result<bool, SlackError> {
    let Some(skew) = now.checked_sub(timestamp).map(i64::unsigned_abs) else {
        return Ok(false);
    };
    if skew > MAX_TIMESTAMP_SKEW_SECS.unsigned_abs() {
        return Ok(false);
    }

    let Some(hex_digest) = received_signature
        .strip_prefix(VERSION_NUMBER)
        .and_then(|rest| rest.strip_prefix('='))
    else {
        return Ok(false);
    };
    let Ok(received) = hex::decode(hex_digest) else {
        return Ok(false);
    };

    let mac = signed_mac(signing_secret, timestamp, body)?;
    Ok(mac.verify_slice(&received).is_ok())
}

fn signed_mac(signing_secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, SlackError> {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|e| SlackError::Config(format!("invalid signing secret: {}", e)))?;
    mac.update(format!("{}:{}:", VERSION_NUMBER, timestamp).as_bytes());
    mac.update(body);
    Ok(mac)
}
