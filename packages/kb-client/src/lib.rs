//! Knowledge base REST client.
//!
//! Talks to two endpoints: the runtime API (`retrieveAndGenerate`) and the
//! management API (list data sources, start ingestion jobs). Requests carry a
//! bearer API key.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_client::KnowledgeBaseClient;
//!
//! let client = KnowledgeBaseClient::for_region("us-east-1", api_key);
//! let result = client.retrieve_and_generate("KB123", "arn:...:model", "What is X?").await?;
//! println!("{} ({} sources)", result.text, result.reference_urls.len());
//! ```

pub mod error;
pub mod types;

pub use error::{KbError, Result};
pub use types::*;

use std::time::Instant;

use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

/// Page size requested when listing data sources.
const DATA_SOURCE_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct KnowledgeBaseClient {
    http_client: Client,
    api_key: String,
    runtime_url: String,
    agent_url: String,
}

impl KnowledgeBaseClient {
    pub fn new(
        api_key: impl Into<String>,
        runtime_url: impl Into<String>,
        agent_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            runtime_url: runtime_url.into().trim_end_matches('/').to_string(),
            agent_url: agent_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client for the public regional endpoints.
    pub fn for_region(region: &str, api_key: impl Into<String>) -> Self {
        Self::new(
            api_key,
            format!("https://bedrock-agent-runtime.{}.amazonaws.com", region),
            format!("https://bedrock-agent.{}.amazonaws.com", region),
        )
    }

    pub fn runtime_url(&self) -> &str {
        &self.runtime_url
    }

    pub fn agent_url(&self) -> &str {
        &self.agent_url
    }

    /// Query the knowledge base and generate an answer with `model_arn`.
    pub async fn retrieve_and_generate(
        &self,
        knowledge_base_id: &str,
        model_arn: &str,
        query: &str,
    ) -> Result<RetrievalResult> {
        let start = Instant::now();
        let request = RetrieveAndGenerateRequest::knowledge_base(query, knowledge_base_id, model_arn);

        let response: RetrieveAndGenerateResponse = self
            .send(
                Method::POST,
                format!("{}/retrieveAndGenerate", self.runtime_url),
                &request,
            )
            .await?;

        let result = response
            .into_result()
            .ok_or_else(|| KbError::Parse("no output generated for the input".into()))?;

        debug!(
            knowledge_base_id,
            references = result.reference_urls.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "retrieve and generate"
        );

        Ok(result)
    }

    /// List every data source attached to a knowledge base, following pagination.
    pub async fn list_data_sources(&self, knowledge_base_id: &str) -> Result<Vec<DataSourceSummary>> {
        let url = format!(
            "{}/knowledgebases/{}/datasources/",
            self.agent_url, knowledge_base_id
        );

        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let request = ListDataSourcesRequest {
                max_results: Some(DATA_SOURCE_PAGE_SIZE),
                next_token: next_token.take(),
            };
            let page: ListDataSourcesResponse = self.send(Method::POST, url.clone(), &request).await?;
            summaries.extend(page.data_source_summaries);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(summaries)
    }

    /// Start an ingestion (sync) job for one data source.
    pub async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> Result<IngestionJob> {
        let url = format!(
            "{}/knowledgebases/{}/datasources/{}/ingestionjobs/",
            self.agent_url, knowledge_base_id, data_source_id
        );

        let response: StartIngestionJobResponse = self
            .send(Method::PUT, url, &serde_json::json!({}))
            .await?;

        Ok(response.ingestion_job)
    }

    async fn send<B, T>(&self, method: Method, url: String, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, url = %url, "knowledge base request failed");
                KbError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "knowledge base API error");
            return Err(KbError::Api(format!("{}: {}", status, error_text)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn regional_endpoints() {
        let client = KnowledgeBaseClient::for_region("ap-northeast-1", "key");
        assert_eq!(
            client.runtime_url(),
            "https://bedrock-agent-runtime.ap-northeast-1.amazonaws.com"
        );
        assert_eq!(
            client.agent_url(),
            "https://bedrock-agent.ap-northeast-1.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn retrieve_and_generate_parses_answer() {
        let router = Router::new().route(
            "/retrieveAndGenerate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["input"]["text"], "question");
                Json(json!({
                    "output": { "text": "the answer" },
                    "citations": [{ "retrievedReferences": [
                        { "location": { "type": "CONFLUENCE", "confluenceLocation": { "url": "https://wiki/page" } } }
                    ] }]
                }))
            }),
        );
        let base = serve(router).await;
        let client = KnowledgeBaseClient::new("key", &base, &base);

        let result = client
            .retrieve_and_generate("KB1", "arn:model", "question")
            .await
            .unwrap();

        assert_eq!(result.text, "the answer");
        assert_eq!(result.reference_urls, vec!["https://wiki/page"]);
    }

    #[tokio::test]
    async fn list_data_sources_follows_pagination() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/knowledgebases/:kb/datasources/",
                post(
                    |State(calls): State<Arc<AtomicUsize>>, Json(body): Json<Value>| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if body.get("nextToken").is_none() {
                            Json(json!({
                                "dataSourceSummaries": [{ "dataSourceId": "DS1" }],
                                "nextToken": "page-2"
                            }))
                        } else {
                            Json(json!({ "dataSourceSummaries": [{ "dataSourceId": "DS2" }] }))
                        }
                    },
                ),
            )
            .with_state(calls.clone());
        let base = serve(router).await;
        let client = KnowledgeBaseClient::new("key", &base, &base);

        let sources = client.list_data_sources("KB1").await.unwrap();

        let ids: Vec<_> = sources.iter().map(|s| s.data_source_id.as_str()).collect();
        assert_eq!(ids, vec!["DS1", "DS2"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn api_errors_are_reported() {
        let router = Router::new().route(
            "/knowledgebases/:kb/datasources/:ds/ingestionjobs/",
            put(|Path((_kb, _ds)): Path<(String, String)>| async {
                (axum::http::StatusCode::TOO_MANY_REQUESTS, "throttled")
            }),
        );
        let base = serve(router).await;
        let client = KnowledgeBaseClient::new("key", &base, &base);

        let err = client.start_ingestion_job("KB1", "DS1").await.unwrap_err();
        assert!(matches!(err, KbError::Api(msg) if msg.contains("throttled")));
    }
}
