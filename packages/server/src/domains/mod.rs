// Business domains
pub mod knowledge_base;
pub mod slack_events;
