// Slack Knowledge Base Relay - Core
//
// Acknowledges Slack Events API webhooks immediately, defers answering to a
// durable per-channel FIFO queue, and keeps the knowledge base in sync on a
// weekday schedule.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
