//! Happy-path exchanges: frame sequence, persisted pair, titles, context window

use std::sync::{Arc, Mutex};

use tokio_test::assert_ok;
use uuid::Uuid;

use threadline_conversations::{
    Conversation, CreateThread, EchoGenerator, FnGenerator, Frame, GenerationContext, Message,
    MessageRole, SendMessage, ServiceConfig,
};

use crate::common::{kinds, scripted, stream_text, TestApp};

mod test_send_message {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_exchange_emits_full_frame_sequence() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;
        let mut viewer = app.subscribe(conversation.id).await;

        let user_message = assert_ok!(
            app.service
                .send_message(
                    SendMessage::user(conversation.id, "Hi")
                        .with_generator(scripted(&["Hel", "lo"], "Hello")),
                )
                .await
        );

        let frames = viewer.drain();
        assert_eq!(
            kinds(&frames),
            vec![
                "message",
                "stream_start",
                "stream_chunk",
                "stream_chunk",
                "stream_end"
            ]
        );
        assert_eq!(frames[0], Frame::message(&user_message));

        let messages = assert_ok!(app.service.messages(conversation.id, None).await);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, user_message.id);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hello");

        match (&frames[1], &frames[4]) {
            (
                Frame::StreamStart { message_id: start, .. },
                Frame::StreamEnd { message_id: end, content },
            ) => {
                assert_eq!(*start, messages[1].id);
                assert_eq!(*end, messages[1].id);
                assert_eq!(content, "Hello");
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_first_message_hello_streams_hi_there() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;
        let mut viewer = app.subscribe(conversation.id).await;

        assert_ok!(
            app.service
                .send_message(
                    SendMessage::user(conversation.id, "Hello!")
                        .with_generator(scripted(&["Hi ", "there"], "Hi there")),
                )
                .await
        );

        let messages = assert_ok!(app.service.messages(conversation.id, None).await);
        let stored: Vec<(MessageRole, &str)> = messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            stored,
            vec![
                (MessageRole::User, "Hello!"),
                (MessageRole::Assistant, "Hi there")
            ]
        );

        let reply_id = messages[1].id;
        let frames = viewer.drain();
        assert_eq!(
            frames[1..].to_vec(),
            vec![
                Frame::StreamStart {
                    message_id: reply_id,
                    conversation_id: conversation.id,
                },
                Frame::StreamChunk {
                    message_id: reply_id,
                    text: "Hi ".to_string(),
                },
                Frame::StreamChunk {
                    message_id: reply_id,
                    text: "there".to_string(),
                },
                Frame::StreamEnd {
                    message_id: reply_id,
                    content: "Hi there".to_string(),
                },
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_reply_without_chunks_is_sent_as_one_chunk() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;
        let mut viewer = app.subscribe(conversation.id).await;

        assert_ok!(
            app.service
                .send_message(
                    SendMessage::user(conversation.id, "Hi")
                        .with_generator(scripted(&[], "All at once")),
                )
                .await
        );

        let frames = viewer.drain();
        assert_eq!(
            kinds(&frames),
            vec!["message", "stream_start", "stream_chunk", "stream_end"]
        );
        let (chunks, end) = stream_text(&frames);
        assert_eq!(chunks, "All at once");
        assert_eq!(end.as_deref(), Some("All at once"));
    }

    #[test_log::test(tokio::test)]
    async fn test_echo_generator_reply_is_stored() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;

        assert_ok!(
            app.service
                .send_message(
                    SendMessage::user(conversation.id, "hello world")
                        .with_generator(Arc::new(EchoGenerator::new())),
                )
                .await
        );

        let messages = assert_ok!(app.service.messages(conversation.id, None).await);
        assert_eq!(messages[1].content, "Echo: hello world");
    }

    #[test_log::test(tokio::test)]
    async fn test_exchange_bumps_updated_at() {
        let app = TestApp::new().await;
        let conversation = app.conversation().await;

        assert_ok!(
            app.service
                .send_message(
                    SendMessage::user(conversation.id, "ping")
                        .with_generator(scripted(&[], "pong")),
                )
                .await
        );

        let messages = assert_ok!(app.service.messages(conversation.id, None).await);
        let reloaded = assert_ok!(app.service.conversation(conversation.id).await);
        assert!(reloaded.updated_at >= messages[1].created_at);
        assert!(reloaded.updated_at >= conversation.updated_at);
    }
}

mod test_create_thread {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_title_falls_back_to_first_message() {
        let app = TestApp::new().await;
        let first = "Plan a weekend trip to Lisbon with friends next spring";

        let outcome = assert_ok!(
            app.service
                .create_thread_with_first_message(CreateThread::new(
                    Uuid::new_v4(),
                    first,
                    scripted(&["Sure"], "Sure"),
                ))
                .await
        );

        let conversation = assert_ok!(
            app.service
                .conversation(outcome.user_message.conversation_id)
                .await
        );
        assert_eq!(
            conversation.title.as_deref(),
            Some(Conversation::fallback_title(first).as_str())
        );
        assert_eq!(outcome.user_message.content, first);
        assert_eq!(outcome.assistant_message.content, "Sure");
        assert_eq!(outcome.assistant_message.role, MessageRole::Assistant);
    }

    #[test_log::test(tokio::test)]
    async fn test_explicit_title_is_trimmed() {
        let app = TestApp::new().await;
        let conversation_id = Uuid::new_v4();

        assert_ok!(
            app.service
                .create_thread_with_first_message(
                    CreateThread::new(Uuid::new_v4(), "hello", scripted(&[], "hi"))
                        .with_conversation_id(conversation_id)
                        .with_title("  Trip planning  "),
                )
                .await
        );

        let conversation = assert_ok!(app.service.conversation(conversation_id).await);
        assert_eq!(conversation.title.as_deref(), Some("Trip planning"));

        let messages = assert_ok!(app.service.messages(conversation_id, None).await);
        assert_eq!(messages.len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_reused_conversation_id_is_conflict() {
        let app = TestApp::new().await;
        let conversation_id = Uuid::new_v4();

        assert_ok!(
            app.service
                .create_thread_with_first_message(
                    CreateThread::new(Uuid::new_v4(), "first", scripted(&[], "ok"))
                        .with_conversation_id(conversation_id),
                )
                .await
        );

        let result = app
            .service
            .create_thread_with_first_message(
                CreateThread::new(Uuid::new_v4(), "second", scripted(&[], "ok"))
                    .with_conversation_id(conversation_id),
            )
            .await;
        assert!(matches!(
            result,
            Err(threadline_common::Error::Conflict(_))
        ));

        let messages = assert_ok!(app.service.messages(conversation_id, None).await);
        assert_eq!(messages.len(), 2);
    }
}

mod test_history {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_generator_sees_latest_window_in_order() {
        let app = TestApp::with_config(ServiceConfig {
            history_limit: 3,
            ..ServiceConfig::default()
        })
        .await;
        let conversation = app.conversation().await;

        for content in ["one", "two", "three", "four"] {
            assert_ok!(
                app.service
                    .send_message(SendMessage::user(conversation.id, content))
                    .await
            );
        }

        let seen: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let generator = Arc::new(FnGenerator::new(move |ctx: GenerationContext, _sink| {
            let captured = captured.clone();
            async move {
                *captured.lock().unwrap() = ctx.history.clone();
                Ok("noted".to_string())
            }
        }));

        let sent = assert_ok!(
            app.service
                .send_message(SendMessage::user(conversation.id, "five").with_generator(generator))
                .await
        );

        let history = seen.lock().unwrap().clone();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "four", "five"]);
        assert_eq!(history.last().map(|m| m.id), Some(sent.id));
    }
}
