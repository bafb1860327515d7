use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use kb_client::RetrievalResult;
use regex::Regex;
use slack::MessageEventRequest;
use tracing::{debug, info};

use crate::kernel::event_queue::{ConsumerFailure, EventMessage, MessageHandler};
use crate::kernel::{BaseChatPoster, BaseKnowledgeBase};

static RE_USER_MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<@[^>]*>").ok());

/// Remove `<@U…>` mentions and surrounding whitespace.
pub fn strip_mentions(text: &str) -> String {
    match RE_USER_MENTION.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Reply body: mention the asker, then the answer, then numbered source links.
pub fn format_reply(user_id: &str, result: &RetrievalResult) -> String {
    let references = result
        .reference_urls
        .iter()
        .enumerate()
        .map(|(index, url)| format!("{}: <{}>", index + 1, url))
        .collect::<Vec<_>>();

    let reference_block = if references.is_empty() {
        String::new()
    } else {
        format!("\n\nRelated URLs: \n{}", references.join("\n"))
    };

    format!("<@{}>\n{}{}", user_id, result.text, reference_block)
}

/// Answers an app mention from the knowledge base, in the mention's thread.
pub struct MentionResponder {
    knowledge_base: Arc<dyn BaseKnowledgeBase>,
    chat: Arc<dyn BaseChatPoster>,
}

impl MentionResponder {
    pub fn new(knowledge_base: Arc<dyn BaseKnowledgeBase>, chat: Arc<dyn BaseChatPoster>) -> Self {
        Self {
            knowledge_base,
            chat,
        }
    }
}

#[async_trait]
impl MessageHandler for MentionResponder {
    async fn handle(&self, message: &EventMessage) -> Result<(), ConsumerFailure> {
        let request: MessageEventRequest = serde_json::from_slice(&message.payload)
            .map_err(|e| ConsumerFailure::Payload(e.to_string()))?;
        let event = request.event;

        let query = strip_mentions(&event.text);
        if query.is_empty() {
            debug!(message_id = %message.id, "mention had no question, nothing to answer");
            return Ok(());
        }

        let result = self
            .knowledge_base
            .retrieve_and_generate(&query)
            .await
            .map_err(|e| ConsumerFailure::Handler(format!("retrieve failed: {:#}", e)))?;

        self.chat
            .post_thread_reply(&event.channel, &event.event_ts, &format_reply(&event.user, &result))
            .await
            .map_err(|e| ConsumerFailure::Handler(format!("reply failed: {:#}", e)))?;

        info!(
            message_id = %message.id,
            channel = %event.channel,
            references = result.reference_urls.len(),
            "answered mention"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::event_queue::{DedupToken, OrderingKey};
    use crate::kernel::test_dependencies::{MockChatPoster, MockKnowledgeBase};
    use bytes::Bytes;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(text: &str) -> EventMessage {
        let body = serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {
                "type": "app_mention",
                "channel": "C1",
                "user": "U42",
                "text": text,
                "event_ts": "1515449522.000016"
            }
        });
        EventMessage {
            id: Uuid::new_v4(),
            ordering_key: OrderingKey::new("C1").unwrap(),
            dedup_token: DedupToken::new("Ev1").unwrap(),
            payload: Bytes::from(body.to_string()),
            enqueued_at: Utc::now(),
            receive_count: 1,
        }
    }

    #[test]
    fn strips_every_mention() {
        assert_eq!(strip_mentions("<@U0LAN0Z89> is it a river?"), "is it a river?");
        assert_eq!(strip_mentions("hey <@U1> and <@U2>"), "hey  and");
        assert_eq!(strip_mentions("<@U1>   "), "");
        assert_eq!(strip_mentions("no mentions"), "no mentions");
    }

    #[test]
    fn reply_lists_references() {
        let result = RetrievalResult {
            text: "Yes.".to_string(),
            reference_urls: vec!["https://a.example".into(), "https://b.example".into()],
        };
        assert_eq!(
            format_reply("U42", &result),
            "<@U42>\nYes.\n\nRelated URLs: \n1: <https://a.example>\n2: <https://b.example>"
        );
    }

    #[test]
    fn reply_without_references_has_no_list() {
        let result = RetrievalResult {
            text: "No idea.".to_string(),
            reference_urls: vec![],
        };
        assert_eq!(format_reply("U42", &result), "<@U42>\nNo idea.");
    }

    #[tokio::test]
    async fn answers_in_thread() {
        let kb = Arc::new(MockKnowledgeBase::new().with_answer("It is.", &["https://docs.example"]));
        let chat = Arc::new(MockChatPoster::new());
        let responder = MentionResponder::new(kb.clone(), chat.clone());

        responder.handle(&message("<@UBOT> is it?")).await.unwrap();

        assert_eq!(kb.queries(), vec!["is it?".to_string()]);
        let replies = chat.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].channel, "C1");
        assert_eq!(replies[0].thread_ts, "1515449522.000016");
        assert!(replies[0].text.starts_with("<@U42>\nIt is."));
    }

    #[tokio::test]
    async fn empty_question_is_a_successful_noop() {
        let kb = Arc::new(MockKnowledgeBase::new());
        let chat = Arc::new(MockChatPoster::new());
        let responder = MentionResponder::new(kb.clone(), chat.clone());

        responder.handle(&message("<@UBOT>")).await.unwrap();

        assert!(kb.queries().is_empty());
        assert!(chat.replies().is_empty());
    }

    #[tokio::test]
    async fn knowledge_base_failure_is_handler_failure() {
        let kb = Arc::new(MockKnowledgeBase::new().with_failure("throttled"));
        let chat = Arc::new(MockChatPoster::new());
        let responder = MentionResponder::new(kb, chat.clone());

        let err = responder.handle(&message("<@UBOT> hi")).await.unwrap_err();

        assert!(matches!(err, ConsumerFailure::Handler(_)));
        assert!(chat.replies().is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_payload_failure() {
        let responder = MentionResponder::new(
            Arc::new(MockKnowledgeBase::new()),
            Arc::new(MockChatPoster::new()),
        );
        let mut bad = message("hi");
        bad.payload = Bytes::from_static(b"{}");

        assert!(matches!(
            responder.handle(&bad).await,
            Err(ConsumerFailure::Payload(_))
        ));
    }
}
