//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod event_queue;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use deps::{KnowledgeBaseAdapter, ServerDeps, SlackChatAdapter, SlackSignatureAdapter};
pub use scheduled_tasks::{
    start_scheduler, CronSpec, FiringOutcome, SyncTrigger, SYNC_RETRY_ATTEMPTS, SYNC_SCHEDULE,
    SYNC_TIMEOUT,
};
pub use test_dependencies::TestDependencies;
pub use traits::*;
