pub mod sync_data_sources;

pub use sync_data_sources::{sync_data_sources, KnowledgeBaseSync, SyncReport};
