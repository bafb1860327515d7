//! Minimal Slack client: Events API request signing and `chat.postMessage`.
//!
//! ```rust,ignore
//! use slack::{SlackOptions, SlackService};
//!
//! let slack = SlackService::new(SlackOptions {
//!     bot_token: "xoxb-...".into(),
//!     signing_secret: "...".into(),
//! })?;
//!
//! slack.post_thread_reply("C123", "1515449522.000016", "hello").await?;
//! ```

pub mod error;
pub mod models;
pub mod signature;

pub use error::SlackError;
pub use models::*;
pub use signature::{
    compute_signature, verify_signature, REQUEST_SIGNATURE_HEADER, REQUEST_TIMESTAMP_HEADER,
};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

#[derive(Clone)]
pub struct SlackOptions {
    pub bot_token: String,
    pub signing_secret: String,
}

impl std::fmt::Debug for SlackOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackOptions")
            .field("bot_token", &"***")
            .field("signing_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SlackService {
    client: Client,
    headers: HeaderMap,
    signing_secret: String,
    base_url: String,
}

impl SlackService {
    pub fn new(options: SlackOptions) -> Result<Self, SlackError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", options.bot_token))
            .map_err(|e| SlackError::Config(format!("invalid bot token: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );

        Ok(Self {
            client: Client::new(),
            headers,
            signing_secret: options.signing_secret,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different Web API root (tests, proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Verify an inbound Events API request against the configured signing secret.
    pub fn verify_request(
        &self,
        timestamp: i64,
        body: &[u8],
        received_signature: &str,
    ) -> Result<bool, SlackError> {
        verify_signature(
            &self.signing_secret,
            timestamp,
            body,
            received_signature,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Post `text` as a threaded reply. Slack reports most failures with
    /// HTTP 200 and `ok: false`, so both are checked.
    pub async fn post_thread_reply(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<PostMessageResponse, SlackError> {
        let body = json!({
            "channel": channel_id,
            "thread_ts": thread_ts,
            "blocks": [
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": text
                    }
                }
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| SlackError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(SlackError::Api(format!("{}: {}", status, error_body)));
        }

        let parsed = response
            .json::<PostMessageResponse>()
            .await
            .map_err(|e| SlackError::Parse(e.to_string()))?;

        if !parsed.ok {
            return Err(SlackError::Api(
                parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        debug!(channel = channel_id, ts = ?parsed.ts, "posted slack reply");
        Ok(parsed)
    }
}
