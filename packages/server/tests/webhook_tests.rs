//! Integration tests for the Slack Events webhook.
//!
//! Requests go through the full router with real signature verification;
//! only the chat and knowledge base clients are mocked.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header::RETRY_AFTER, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use relay_core::domains::slack_events::MentionResponder;
use relay_core::kernel::event_queue::{EventQueue, InMemoryEventQueue, QueueConsumer};
use relay_core::kernel::test_dependencies::{
    test_config, MockChatPoster, MockKnowledgeBase, RecordingQueue,
};
use relay_core::kernel::{ServerDeps, SlackSignatureAdapter};
use relay_core::server::build_app;
use serde_json::Value;
use slack::{SlackOptions, SlackService};
use test_context::test_context;
use tower::ServiceExt;

use crate::common::{
    app_mention_body, signed_event_request, unsigned_event_request, url_verification_body,
    TestHarness, TEST_SIGNING_SECRET,
};

struct TestApp {
    router: Router,
    queue: Arc<dyn EventQueue>,
    chat: Arc<MockChatPoster>,
    knowledge_base: Arc<MockKnowledgeBase>,
}

fn test_app(queue: Arc<dyn EventQueue>, knowledge_base: MockKnowledgeBase) -> TestApp {
    let slack = SlackService::new(SlackOptions {
        bot_token: "xoxb-test".to_string(),
        signing_secret: TEST_SIGNING_SECRET.to_string(),
    })
    .expect("slack client");

    let chat = Arc::new(MockChatPoster::new());
    let knowledge_base = Arc::new(knowledge_base);
    let deps = ServerDeps::new(
        Arc::new(test_config()),
        queue.clone(),
        Arc::new(SlackSignatureAdapter::new(Arc::new(slack))),
        chat.clone(),
        knowledge_base.clone(),
    );

    TestApp {
        router: build_app(deps),
        queue,
        chat,
        knowledge_base,
    }
}

fn in_memory_app() -> TestApp {
    test_app(Arc::new(InMemoryEventQueue::default()), MockKnowledgeBase::new())
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Ingress responses
// =============================================================================

#[tokio::test]
async fn signed_mention_is_acknowledged_and_queued() {
    let app = in_memory_app();
    let body = app_mention_body("Ev1", "C1", "<@UBOT> what is a river?");

    let response = send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({}));
    assert_eq!(app.queue.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let app = in_memory_app();
    let body = url_verification_body("3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P");

    let response = send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["challenge"],
        "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"
    );
    assert_eq!(app.queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn wrong_secret_is_unauthorized() {
    let app = in_memory_app();
    let body = app_mention_body("Ev1", "C1", "<@UBOT> hi");

    let response = send(&app, signed_event_request(&body, "some-other-secret")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["success"], false);
    assert_eq!(app.queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn missing_signature_is_unauthorized() {
    let app = in_memory_app();
    let body = app_mention_body("Ev1", "C1", "<@UBOT> hi");

    let response = send(&app, unsigned_event_request(&body)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let app = in_memory_app();

    let response = send(&app, signed_event_request("{not json", TEST_SIGNING_SECRET)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn queue_outage_asks_caller_to_retry() {
    let queue = Arc::new(RecordingQueue::new());
    queue.set_unavailable(true);
    let app = test_app(queue.clone(), MockKnowledgeBase::new());
    let body = app_mention_body("Ev1", "C1", "<@UBOT> hi");

    let response = send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "5");
    assert_eq!(queue.enqueues().len(), 1);
}

#[tokio::test]
async fn slack_retry_of_same_event_is_deduplicated() {
    let app = in_memory_app();
    let body = app_mention_body("Ev1", "C1", "<@UBOT> hi");

    let first = send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;
    let retry = send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(app.queue.stats().await.unwrap().pending, 1);
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn health_reports_queue_counts() {
    let app = in_memory_app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"]["stats"]["pending"], 0);
}

#[tokio::test]
async fn health_is_unavailable_when_queue_is_down() {
    let queue = Arc::new(RecordingQueue::new());
    queue.set_unavailable(true);
    let app = test_app(queue, MockKnowledgeBase::new());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "unhealthy");
}

// =============================================================================
// Webhook -> Postgres queue -> consumer
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn mention_is_answered_in_thread_from_durable_queue(ctx: &TestHarness) {
    let queue: Arc<dyn EventQueue> = Arc::new(ctx.queue());
    let app = test_app(
        queue.clone(),
        MockKnowledgeBase::new().with_answer("A river is flowing water.", &["https://docs.example/river"]),
    );
    let body = app_mention_body("Ev1", "C1", "<@UBOT> what is a river?");

    let response = send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let responder = Arc::new(MentionResponder::new(
        app.knowledge_base.clone(),
        app.chat.clone(),
    ));
    let consumer = QueueConsumer::new(queue.clone(), responder);
    assert_eq!(consumer.poll_once().await.unwrap(), 1);

    assert_eq!(app.knowledge_base.queries(), vec!["what is a river?".to_string()]);
    let replies = app.chat.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].channel, "C1");
    assert_eq!(replies[0].thread_ts, "1515449522.000016");
    assert_eq!(
        replies[0].text,
        "<@U061F7AUR>\nA river is flowing water.\n\nRelated URLs: \n1: <https://docs.example/river>"
    );

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending + stats.leased, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_answer_leaves_message_leased(ctx: &TestHarness) {
    let queue: Arc<dyn EventQueue> = Arc::new(ctx.queue());
    let app = test_app(queue.clone(), MockKnowledgeBase::new().with_failure("throttled"));
    let body = app_mention_body("Ev1", "C1", "<@UBOT> hi");

    send(&app, signed_event_request(&body, TEST_SIGNING_SECRET)).await;

    let responder = Arc::new(MentionResponder::new(
        app.knowledge_base.clone(),
        app.chat.clone(),
    ));
    let consumer = QueueConsumer::new(queue.clone(), responder);
    consumer.poll_once().await.unwrap();

    assert!(app.chat.replies().is_empty());
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.leased, 1, "redelivered only after the lease lapses");
}
