// HTTP routes
pub mod health;
pub mod slack_events;

pub use health::*;
pub use slack_events::*;
