use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use crate::kernel::{BaseKnowledgeBase, SyncHandler};

/// Outcome of one pass over the knowledge base's data sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// `(data_source_id, ingestion_job_id)` for every job started.
    pub started: Vec<(String, String)>,
    /// Data source IDs whose ingestion could not be started.
    pub failed: Vec<String>,
}

/// Start an ingestion job for every data source.
///
/// A data source that fails to start is logged and skipped; failing to list
/// the data sources fails the whole pass.
pub async fn sync_data_sources(knowledge_base: &dyn BaseKnowledgeBase) -> Result<SyncReport> {
    let data_sources = knowledge_base
        .list_data_sources()
        .await
        .context("Failed to list data sources")?;

    info!(count = data_sources.len(), "starting data source ingestion");

    let mut report = SyncReport::default();
    for source in data_sources {
        match knowledge_base
            .start_ingestion_job(&source.data_source_id)
            .await
        {
            Ok(job_id) => {
                info!(
                    data_source_id = %source.data_source_id,
                    ingestion_job_id = %job_id,
                    "ingestion job started"
                );
                report.started.push((source.data_source_id, job_id));
            }
            Err(e) => {
                error!(
                    data_source_id = %source.data_source_id,
                    error = %e,
                    "failed to start ingestion job"
                );
                report.failed.push(source.data_source_id);
            }
        }
    }

    Ok(report)
}

/// Scheduled sync handler.
pub struct KnowledgeBaseSync {
    knowledge_base: Arc<dyn BaseKnowledgeBase>,
}

impl KnowledgeBaseSync {
    pub fn new(knowledge_base: Arc<dyn BaseKnowledgeBase>) -> Self {
        Self { knowledge_base }
    }
}

#[async_trait]
impl SyncHandler for KnowledgeBaseSync {
    async fn sync(&self) -> Result<()> {
        let report = sync_data_sources(self.knowledge_base.as_ref()).await?;
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "knowledge base sync pass finished"
        );
        Ok(())
    }
}
