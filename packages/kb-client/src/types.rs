//! Wire types for the retrieve-and-generate and data source APIs.

use serde::{Deserialize, Serialize};

// =============================================================================
// Retrieve and generate
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateRequest {
    pub input: RetrieveInput,
    pub retrieve_and_generate_configuration: RetrieveAndGenerateConfiguration,
}

impl RetrieveAndGenerateRequest {
    pub fn knowledge_base(
        query: impl Into<String>,
        knowledge_base_id: impl Into<String>,
        model_arn: impl Into<String>,
    ) -> Self {
        Self {
            input: RetrieveInput { text: query.into() },
            retrieve_and_generate_configuration: RetrieveAndGenerateConfiguration {
                r#type: "KNOWLEDGE_BASE".to_string(),
                knowledge_base_configuration: KnowledgeBaseConfiguration {
                    knowledge_base_id: knowledge_base_id.into(),
                    model_arn: model_arn.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveInput {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateConfiguration {
    pub r#type: String,
    pub knowledge_base_configuration: KnowledgeBaseConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfiguration {
    pub knowledge_base_id: String,
    pub model_arn: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateResponse {
    pub output: Option<GeneratedOutput>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedOutput {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    #[serde(default)]
    pub retrieved_references: Vec<RetrievedReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedReference {
    pub location: Option<ReferenceLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceLocation {
    pub r#type: Option<String>,
    pub confluence_location: Option<UrlLocation>,
    pub web_location: Option<UrlLocation>,
    pub share_point_location: Option<UrlLocation>,
    pub salesforce_location: Option<UrlLocation>,
}

impl ReferenceLocation {
    pub fn url(&self) -> Option<&str> {
        [
            &self.confluence_location,
            &self.web_location,
            &self.share_point_location,
            &self.salesforce_location,
        ]
        .into_iter()
        .flatten()
        .find_map(|location| location.url.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlLocation {
    pub url: Option<String>,
}

/// Generated answer plus the source URLs it cites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub reference_urls: Vec<String>,
}

impl RetrieveAndGenerateResponse {
    /// Collapse into a [`RetrievalResult`], keeping the first occurrence of each URL.
    pub fn into_result(self) -> Option<RetrievalResult> {
        let output = self.output?;
        let mut reference_urls: Vec<String> = Vec::new();
        for url in self
            .citations
            .iter()
            .flat_map(|c| c.retrieved_references.iter())
            .filter_map(|r| r.location.as_ref().and_then(ReferenceLocation::url))
        {
            if !reference_urls.iter().any(|seen| seen == url) {
                reference_urls.push(url.to_string());
            }
        }

        Some(RetrievalResult {
            text: output.text,
            reference_urls,
        })
    }
}

// =============================================================================
// Data sources and ingestion jobs
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDataSourcesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDataSourcesResponse {
    #[serde(default)]
    pub data_source_summaries: Vec<DataSourceSummary>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSummary {
    pub data_source_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartIngestionJobResponse {
    pub ingestion_job: IngestionJob,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub ingestion_job_id: String,
    #[serde(default)]
    pub status: Option<String>,
}
