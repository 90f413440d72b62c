//! Idempotent sends: repeated tokens collapse onto one stored message

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use threadline_common::Error;
use threadline_conversations::{MessageRole, SendMessage};

use crate::common::{counting, TestApp};

mod test_same_conversation {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_concurrent_sends_with_same_token_store_one_message() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = counting(calls.clone());

        let first = app.service.send_message(
            SendMessage::user(conversation.id, "hello")
                .with_token("tok-1")
                .with_generator(generator.clone()),
        );
        let second = app.service.send_message(
            SendMessage::user(conversation.id, "hello")
                .with_token("tok-1")
                .with_generator(generator.clone()),
        );
        let (first, second) = futures::join!(first, second);
        let first = assert_ok!(first);
        let second = assert_ok!(second);

        assert_eq!(first.id, second.id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let messages = assert_ok!(app.service.messages(conversation.id, None).await);
        let user_messages: Vec<_> = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .collect();
        assert_eq!(user_messages.len(), 1);
        assert_eq!(user_messages[0].idempotency_token.as_deref(), Some("tok-1"));
        assert_eq!(messages.len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_retry_returns_stored_message_without_frames() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;

        let stored = assert_ok!(
            app.service
                .send_message(SendMessage::user(conversation.id, "hello").with_token("retry-me"))
                .await
        );

        let mut viewer = app.subscribe(conversation.id).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let retried = assert_ok!(
            app.service
                .send_message(
                    SendMessage::user(conversation.id, "hello, edited")
                        .with_token("retry-me")
                        .with_generator(counting(calls.clone())),
                )
                .await
        );

        assert_eq!(retried, stored);
        assert_eq!(retried.content, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(viewer.drain().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_messages_without_token_are_never_deduplicated() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;

        for _ in 0..3 {
            assert_ok!(
                app.service
                    .send_message(SendMessage::user(conversation.id, "same text"))
                    .await
            );
        }

        let messages = assert_ok!(app.service.messages(conversation.id, None).await);
        assert_eq!(messages.len(), 3);
    }
}

mod test_cross_conversation {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_token_owned_by_other_conversation_is_conflict() {
        let app = TestApp::new().await;
        let first = app.conversation().await;
        let second = app.conversation().await;

        assert_ok!(
            app.service
                .send_message(SendMessage::user(first.id, "hello").with_token("shared"))
                .await
        );

        let err = assert_err!(
            app.service
                .send_message(SendMessage::user(second.id, "hello").with_token("shared"))
                .await
        );
        assert!(matches!(err, Error::Conflict(_)));

        let messages = assert_ok!(app.service.messages(second.id, None).await);
        assert!(messages.is_empty());
    }
}
