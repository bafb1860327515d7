use serde::{Deserialize, Serialize};

pub const EVENT_CALLBACK_TYPE: &str = "event_callback";
pub const URL_VERIFICATION_TYPE: &str = "url_verification";
pub const APP_MENTION_EVENT_TYPE: &str = "app_mention";

/// Handshake Slack sends when the Events API request URL is configured.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EventChallengeRequest {
    pub challenge: String,
    #[serde(default)]
    pub token: String,
    pub r#type: String,
}

impl EventChallengeRequest {
    pub fn is_url_verification(&self) -> bool {
        self.r#type == URL_VERIFICATION_TYPE
    }
}

/// `event_callback` envelope wrapping an `app_mention` event.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageEventRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub api_app_id: String,
    pub r#type: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_time: Option<u64>,
    pub event: AppMentionMessageEvent,
}

impl MessageEventRequest {
    pub fn is_app_mention(&self) -> bool {
        self.r#type == EVENT_CALLBACK_TYPE && self.event.r#type == APP_MENTION_EVENT_TYPE
    }
}

/// https://api.slack.com/events/app_mention
/// ```text
///  {
///     "type": "app_mention",
///     "user": "U061F7AUR",
///     "text": "<@U0LAN0Z89> is it everything a river should be?",
///     "ts": "1515449522.000016",
///     "channel": "C123ABC456",
///     "event_ts": "1515449522000016"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppMentionMessageEvent {
    #[serde(default)]
    pub channel: String,
    pub r#type: String,
    /// Used as `thread_ts` when replying.
    #[serde(default)]
    pub event_ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: String,
}

/// Subset of the `chat.postMessage` response we inspect.
#[derive(Debug, Deserialize, Clone)]
pub struct PostMessageResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}
