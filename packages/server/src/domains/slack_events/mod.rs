//! Slack Events API domain.
//!
//! Ingress turns a signed webhook into exactly one queued message; the
//! mention responder is the deferred work run by the queue consumer.

pub mod actions;
pub mod models;

pub use actions::{ingest_event, MentionResponder, SignedRequest};
pub use models::{IngressError, IngressOutcome};
