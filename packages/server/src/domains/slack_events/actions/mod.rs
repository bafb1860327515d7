//! Slack events actions - entry-point business logic
//!
//! `ingest_event` is called from the webhook route; `MentionResponder` is
//! registered with the queue consumer.

pub mod answer_mention;
pub mod ingest_event;

pub use answer_mention::{format_reply, strip_mentions, MentionResponder};
pub use ingest_event::{ingest_event, SignedRequest};
