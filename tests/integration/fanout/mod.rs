//! Fan-out: every subscriber of a conversation sees the same frames, and a
//! departing subscriber never disturbs the exchange

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_test::assert_ok;

use threadline_conversations::{
    EchoGenerator, FnGenerator, Frame, GenerationContext, Generator, MessageRole, SendMessage,
};

use crate::common::{kinds, scripted, stream_text, TestApp};

#[test_log::test(tokio::test)]
async fn test_subscribers_receive_identical_frames() {
    let app = TestApp::new().await;
    let watched = app.conversation().await;
    let other = app.conversation().await;

    let mut viewers = vec![
        app.subscribe(watched.id).await,
        app.subscribe(watched.id).await,
        app.subscribe(watched.id).await,
    ];
    let mut bystander = app.subscribe(other.id).await;

    assert_ok!(
        app.service
            .send_message(
                SendMessage::user(watched.id, "broadcast")
                    .with_generator(scripted(&["to ", "all"], "to all")),
            )
            .await
    );

    let first = viewers[0].drain();
    assert_eq!(first.len(), 5);
    for viewer in viewers.iter_mut().skip(1) {
        assert_eq!(viewer.drain(), first);
    }
    assert!(bystander.drain().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_disconnect_mid_stream_does_not_abort_exchange() {
    let app = TestApp::new().await;
    let conversation = app.conversation().await;
    let leaving = app.subscribe(conversation.id).await;
    let mut staying = app.subscribe(conversation.id).await;

    let halfway = Arc::new(Notify::new());
    let resume = Arc::new(Notify::new());
    let generator: Arc<dyn Generator> = {
        let halfway = halfway.clone();
        let resume = resume.clone();
        Arc::new(FnGenerator::new(move |_ctx: GenerationContext, sink| {
            let halfway = halfway.clone();
            let resume = resume.clone();
            async move {
                sink.send("first ").await;
                halfway.notify_one();
                resume.notified().await;
                sink.send("second").await;
                Ok("first second".to_string())
            }
        }))
    };

    let service = app.service.clone();
    let exchange = tokio::spawn(async move {
        service
            .send_message(SendMessage::user(conversation.id, "go").with_generator(generator))
            .await
    });

    halfway.notified().await;
    drop(leaving);
    resume.notify_one();

    assert_ok!(exchange.await.unwrap());

    let frames = staying.drain();
    assert_eq!(kinds(&frames).last(), Some(&"stream_end"));
    assert_eq!(app.registry().subscriber_count(conversation.id).await, 1);

    let messages = assert_ok!(app.service.messages(conversation.id, None).await);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "first second");
}

#[test_log::test(tokio::test)]
async fn test_caller_going_away_does_not_cancel_exchange() {
    let app = TestApp::new().await;
    let conversation = app.conversation().await;
    let mut viewer = app.subscribe(conversation.id).await;

    let started = Arc::new(Notify::new());
    let generator: Arc<dyn Generator> = {
        let started = started.clone();
        Arc::new(FnGenerator::new(move |_ctx: GenerationContext, sink| {
            let started = started.clone();
            async move {
                sink.send("still ").await;
                started.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("still here".to_string())
            }
        }))
    };

    {
        let send = app.service.send_message(
            SendMessage::user(conversation.id, "are you there?").with_generator(generator),
        );
        tokio::select! {
            _ = started.notified() => {}
            result = send => panic!("exchange finished before the caller left: {:?}", result),
        }
    }

    let mut frames = Vec::new();
    while !frames.iter().any(|f: &Frame| f.kind() == "stream_end") {
        let frame = tokio::time::timeout(Duration::from_secs(2), viewer.rx.recv())
            .await
            .expect("stream_end should arrive")
            .expect("subscriber still registered");
        frames.push(frame);
    }
    assert_eq!(
        kinds(&frames),
        vec!["message", "stream_start", "stream_chunk", "stream_chunk", "stream_end"]
    );

    let messages = assert_ok!(app.service.messages(conversation.id, None).await);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "still here");
}

#[test_log::test(tokio::test)]
async fn test_streamed_text_matches_stored_reply() {
    let app = TestApp::new().await;
    let conversation = app.conversation().await;
    let mut viewer = app.subscribe(conversation.id).await;

    assert_ok!(
        app.service
            .send_message(
                SendMessage::user(conversation.id, "the quick brown fox")
                    .with_generator(Arc::new(EchoGenerator::new())),
            )
            .await
    );

    let (chunks, end) = stream_text(&viewer.drain());
    let messages = assert_ok!(app.service.messages(conversation.id, None).await);
    let reply = &messages[1];
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(chunks, reply.content);
    assert_eq!(end.as_deref(), Some(reply.content.as_str()));
}

#[test_log::test(tokio::test)]
async fn test_unsubscribed_connection_receives_nothing() {
    let app = TestApp::new().await;
    let conversation = app.conversation().await;
    let mut viewer = app.subscribe(conversation.id).await;

    assert_eq!(app.service.unsubscribe(viewer.id).await, 1);
    assert_ok!(
        app.service
            .send_message(SendMessage::user(conversation.id, "anyone?"))
            .await
    );
    assert!(viewer.drain().is_empty());
}
