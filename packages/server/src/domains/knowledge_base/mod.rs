//! Knowledge base domain - scheduled data source synchronization.

pub mod actions;

pub use actions::{KnowledgeBaseSync, SyncReport};
