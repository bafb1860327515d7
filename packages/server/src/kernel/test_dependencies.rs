// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use kb_client::{DataSourceSummary, RetrievalResult};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::event_queue::{
    DeadLetter, DedupToken, EnqueueResult, EventQueue, InMemoryEventQueue, LeaseHandle,
    LeasedMessage, OrderingKey, QueueError, QueueStats, SweepReport,
};
use super::{BaseChatPoster, BaseKnowledgeBase, BaseSignatureVerifier, ServerDeps, SyncHandler};
use crate::config::Config;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Mock Knowledge Base
// =============================================================================

pub struct MockKnowledgeBase {
    answers: Arc<Mutex<VecDeque<Result<RetrievalResult, String>>>>,
    queries: Arc<Mutex<Vec<String>>>,
    data_sources: Arc<Mutex<Vec<String>>>,
    failing_data_sources: Arc<Mutex<HashSet<String>>>,
    list_error: Arc<Mutex<Option<String>>>,
    ingestion_calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockKnowledgeBase {
    pub fn new() -> Self {
        Self {
            answers: Arc::new(Mutex::new(VecDeque::new())),
            queries: Arc::new(Mutex::new(Vec::new())),
            data_sources: Arc::new(Mutex::new(Vec::new())),
            failing_data_sources: Arc::new(Mutex::new(HashSet::new())),
            list_error: Arc::new(Mutex::new(None)),
            ingestion_calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Queue an answer for the next retrieve-and-generate call
    pub fn with_answer(self, text: &str, reference_urls: &[&str]) -> Self {
        lock(&self.answers).push_back(Ok(RetrievalResult {
            text: text.to_string(),
            reference_urls: reference_urls.iter().map(|u| u.to_string()).collect(),
        }));
        self
    }

    /// Queue a failure for the next retrieve-and-generate call
    pub fn with_failure(self, error: &str) -> Self {
        lock(&self.answers).push_back(Err(error.to_string()));
        self
    }

    /// Delay every retrieve-and-generate call (for timeout tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_data_sources(self, ids: &[&str]) -> Self {
        lock(&self.data_sources).extend(ids.iter().map(|id| id.to_string()));
        self
    }

    /// Make ingestion for `id` fail
    pub fn with_failing_data_source(self, id: &str) -> Self {
        lock(&self.failing_data_sources).insert(id.to_string());
        self
    }

    pub fn with_list_error(self, error: &str) -> Self {
        *lock(&self.list_error) = Some(error.to_string());
        self
    }

    /// Get all queries that were asked
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    /// Data source IDs ingestion was started for, in call order
    pub fn ingestion_calls(&self) -> Vec<String> {
        lock(&self.ingestion_calls).clone()
    }
}

impl Default for MockKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseKnowledgeBase for MockKnowledgeBase {
    async fn retrieve_and_generate(&self, query: &str) -> Result<RetrievalResult> {
        lock(&self.queries).push(query.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.answers).pop_front();
        match next {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(e)) => Err(anyhow!("{}", e)),
            None => Ok(RetrievalResult {
                text: "Mock answer".to_string(),
                reference_urls: Vec::new(),
            }),
        }
    }

    async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>> {
        if let Some(e) = lock(&self.list_error).clone() {
            return Err(anyhow!("{}", e));
        }
        Ok(lock(&self.data_sources)
            .iter()
            .map(|id| DataSourceSummary {
                data_source_id: id.clone(),
                name: Some(format!("source {}", id)),
                status: Some("AVAILABLE".to_string()),
            })
            .collect())
    }

    async fn start_ingestion_job(&self, data_source_id: &str) -> Result<String> {
        lock(&self.ingestion_calls).push(data_source_id.to_string());
        if lock(&self.failing_data_sources).contains(data_source_id) {
            return Err(anyhow!("ingestion rejected for {}", data_source_id));
        }
        Ok(format!("job-{}", data_source_id))
    }
}

// =============================================================================
// Mock Chat Poster
// =============================================================================

/// A reply captured by MockChatPoster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReply {
    pub channel: String,
    pub thread_ts: String,
    pub text: String,
}

pub struct MockChatPoster {
    replies: Arc<Mutex<Vec<PostedReply>>>,
    fail: AtomicBool,
}

impl MockChatPoster {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(Vec::new())),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every post fail
    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn replies(&self) -> Vec<PostedReply> {
        lock(&self.replies).clone()
    }
}

impl Default for MockChatPoster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseChatPoster for MockChatPoster {
    async fn post_thread_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("channel_not_found"));
        }
        lock(&self.replies).push(PostedReply {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Mock Signature Verifier
// =============================================================================

pub struct MockSignatureVerifier {
    accept: bool,
    calls: AtomicUsize,
}

impl MockSignatureVerifier {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BaseSignatureVerifier for MockSignatureVerifier {
    fn verify(&self, _timestamp: &str, _signature: &str, _body: &[u8]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

// =============================================================================
// Mock Sync Handler
// =============================================================================

pub struct MockSyncHandler {
    calls: AtomicUsize,
    fail: bool,
    hang: bool,
}

impl MockSyncHandler {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            hang: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
            hang: false,
        }
    }

    /// Never completes (for timeout tests)
    pub fn hanging() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            hang: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncHandler for MockSyncHandler {
    async fn sync(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(anyhow!("knowledge base unreachable"));
        }
        Ok(())
    }
}

// =============================================================================
// Recording Queue
// =============================================================================

/// An enqueue captured by RecordingQueue
#[derive(Debug, Clone)]
pub struct RecordedEnqueue {
    pub payload: Bytes,
    pub ordering_key: OrderingKey,
    pub dedup_token: DedupToken,
}

/// In-memory queue that records every enqueue and can simulate an outage.
pub struct RecordingQueue {
    inner: InMemoryEventQueue,
    enqueues: Arc<Mutex<Vec<RecordedEnqueue>>>,
    unavailable: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self {
            inner: InMemoryEventQueue::default(),
            enqueues: Arc::new(Mutex::new(Vec::new())),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Fail every operation with `QueueError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every enqueue attempt that reached the store
    pub fn enqueues(&self) -> Vec<RecordedEnqueue> {
        lock(&self.enqueues).clone()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl Default for RecordingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for RecordingQueue {
    async fn enqueue(
        &self,
        payload: Bytes,
        ordering_key: OrderingKey,
        dedup_token: DedupToken,
    ) -> Result<EnqueueResult, QueueError> {
        lock(&self.enqueues).push(RecordedEnqueue {
            payload: payload.clone(),
            ordering_key: ordering_key.clone(),
            dedup_token: dedup_token.clone(),
        });
        self.check_available()?;
        self.inner.enqueue(payload, ordering_key, dedup_token).await
    }

    async fn dequeue(&self, max_messages: usize) -> Result<Vec<LeasedMessage>, QueueError> {
        self.check_available()?;
        self.inner.dequeue(max_messages).await
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError> {
        self.check_available()?;
        self.inner.delete(lease).await
    }

    async fn sweep_expired(&self) -> Result<SweepReport, QueueError> {
        self.check_available()?;
        self.inner.sweep_expired().await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.check_available()?;
        self.inner.stats().await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        self.check_available()?;
        self.inner.dead_letters().await
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Mocks plus a ServerDeps wired to them.
pub struct TestDependencies {
    pub config: Arc<Config>,
    pub queue: Arc<RecordingQueue>,
    pub signature_verifier: Arc<MockSignatureVerifier>,
    pub chat: Arc<MockChatPoster>,
    pub knowledge_base: Arc<MockKnowledgeBase>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            config: Arc::new(test_config()),
            queue: Arc::new(RecordingQueue::new()),
            signature_verifier: Arc::new(MockSignatureVerifier::accepting()),
            chat: Arc::new(MockChatPoster::new()),
            knowledge_base: Arc::new(MockKnowledgeBase::new()),
        }
    }

    pub fn with_signature_verifier(mut self, verifier: MockSignatureVerifier) -> Self {
        self.signature_verifier = Arc::new(verifier);
        self
    }

    pub fn with_chat(mut self, chat: MockChatPoster) -> Self {
        self.chat = Arc::new(chat);
        self
    }

    pub fn with_knowledge_base(mut self, knowledge_base: MockKnowledgeBase) -> Self {
        self.knowledge_base = Arc::new(knowledge_base);
        self
    }

    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.config.clone(),
            self.queue.clone(),
            self.signature_verifier.clone(),
            self.chat.clone(),
            self.knowledge_base.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

/// Config with placeholder credentials and no database.
pub fn test_config() -> Config {
    Config {
        slack_signing_secret: "test-signing-secret".to_string(),
        bot_oauth_token: "xoxb-test".to_string(),
        chat_model_id: "test-model".to_string(),
        knowledge_base_id: "KBTEST".to_string(),
        kb_api_key: "test-kb-key".to_string(),
        kb_region: "us-east-1".to_string(),
        kb_runtime_url: None,
        kb_agent_url: None,
        database_url: None,
        port: 0,
        consumer_concurrency: 4,
        max_receive_count: None,
        sync_enabled: false,
    }
}
