//! Chat session behaviour against the in-memory transport and persistence.
//!
//! Run:
//!   cargo test -p mentor --test chat_session_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mentor::chat::{ChatSession, ChatStatus, SessionOptions};
use mentor::drafts::AutoOpenPolicy;
use mentor::testing::{MemoryPersistence, ScriptedTransport};
use mentor::transport::TransportError;
use mentor::AppContext;
use shared_types::{
    ArtifactId, DocumentFrame, DocumentKind, Message, MessageRole, Rect, StreamFrame, Thread,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

struct Harness {
    context: AppContext,
    transport: Arc<ScriptedTransport>,
    persistence: Arc<MemoryPersistence>,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let persistence = Arc::new(MemoryPersistence::default());
        let context = AppContext::new(transport.clone(), persistence.clone());
        Self {
            context,
            transport,
            persistence,
        }
    }

    fn session(&self, options: SessionOptions) -> ChatSession {
        self.context.session("thread-1", options)
    }
}

fn reply(message_id: &str, text: &str) -> Vec<StreamFrame> {
    vec![
        StreamFrame::start(Some(message_id.to_string())),
        StreamFrame::text_start("t1"),
        StreamFrame::text_delta("t1", text),
        StreamFrame::text_end("t1"),
        StreamFrame::finish("stop"),
    ]
}

fn persisted_thread() -> Thread {
    let user = Message::user("How do I start my essay?", None);
    let mut assistant = Message::assistant("a1", Some(user.id.clone()));
    assistant.parts = vec![shared_types::MessagePart::text("Begin with a question.")];
    Thread {
        id: "thread-1".to_string(),
        title: "Essay help".to_string(),
        messages: vec![user, assistant],
        selected_leaf_id: Some("a1".to_string()),
        votes: Vec::new(),
    }
}

async fn wait_idle(session: &ChatSession) {
    let mut snapshots = session.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|snapshot| !snapshot.status.is_busy()),
    )
    .await
    .expect("session never settled")
    .expect("snapshot channel closed");
}

// ─── Greeting ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn greeting_is_sent_once_for_an_empty_thread() {
    let harness = Harness::new();
    harness.transport.push_frames(reply("a1", "Hi! What are we writing today?"));
    let session = harness.session(SessionOptions {
        auto_greeting: true,
        ..SessionOptions::default()
    });

    session.open().await.unwrap();
    wait_idle(&session).await;
    session.open().await.unwrap();
    assert!(session.greet().is_none());

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].greeting);
    assert!(requests[0].message.is_none());

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::Assistant);
    assert_eq!(messages[0].text(), "Hi! What are we writing today?");
    assert_eq!(session.status(), ChatStatus::Ready);
}

#[tokio::test]
async fn greeting_is_skipped_when_the_thread_has_history() {
    let harness = Harness::new();
    harness.persistence.insert_thread(persisted_thread());
    let session = harness.session(SessionOptions {
        auto_greeting: true,
        ..SessionOptions::default()
    });

    session.open().await.unwrap();

    assert!(session.is_hydrated());
    assert_eq!(session.messages().len(), 2);
    assert!(harness.transport.requests().is_empty());
}

// ─── Sending ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn blank_messages_never_reach_the_transport() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());

    assert!(session.send_message("").is_none());
    assert!(session.send_message("   \n\t").is_none());
    assert!(harness.transport.requests().is_empty());
    assert!(session.messages().is_empty());

    harness.transport.push_frames(reply("a1", "Hello!"));
    session.send_message("hi").unwrap().await.unwrap();

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1);
    let sent = requests[0].message.as_ref().unwrap();
    assert_eq!(sent.text(), "hi");
    assert_eq!(sent.role, MessageRole::User);
    assert_eq!(requests[0].previous_message_id, None);
}

#[tokio::test]
async fn follow_up_is_parented_to_the_previous_leaf() {
    let harness = Harness::new();
    harness.persistence.insert_thread(persisted_thread());
    let session = harness.session(SessionOptions::default());
    session.hydrate().await.unwrap();

    harness.transport.push_frames(reply("a2", "Try a vivid anecdote."));
    session.send_message("Any other ideas?").unwrap().await.unwrap();

    let requests = harness.transport.requests();
    assert_eq!(requests[0].previous_message_id.as_deref(), Some("a1"));

    let messages = session.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].parent_id.as_deref(), Some("a1"));
    assert_eq!(messages[3].id, "a2");
    assert_eq!(messages[3].parent_id.as_deref(), Some(messages[2].id.as_str()));
    assert_eq!(messages[3].text(), "Try a vivid anecdote.");
}

#[tokio::test]
async fn sends_while_streaming_are_ignored() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    let frames = harness.transport.push_channel();

    let handle = session.send_message("first").unwrap();
    assert_eq!(session.status(), ChatStatus::Submitted);
    assert!(session.send_message("second").is_none());

    frames.send(Ok(StreamFrame::text_delta("t1", "ok"))).unwrap();
    frames.send(Ok(StreamFrame::finish("stop"))).unwrap();
    handle.await.unwrap();

    assert_eq!(harness.transport.requests().len(), 1);
    assert_eq!(session.status(), ChatStatus::Ready);
    let texts: Vec<String> = session.messages().iter().map(Message::text).collect();
    assert_eq!(texts, vec!["first".to_string(), "ok".to_string()]);
}

// ─── Hydration ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn hydration_does_not_clobber_an_in_flight_stream() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    let frames = harness.transport.push_channel();

    let handle = session.send_message("hi").unwrap();
    harness.persistence.insert_thread(persisted_thread());

    assert!(!session.hydrate().await.unwrap());
    assert!(!session.is_hydrated());
    assert_eq!(session.messages()[0].text(), "hi");

    drop(frames);
    handle.await.unwrap();
    assert_eq!(session.status(), ChatStatus::Ready);

    assert!(session.hydrate().await.unwrap());
    assert_eq!(session.messages().len(), 2);
}

#[tokio::test]
async fn hydration_runs_after_a_stopped_stream() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    let frames = harness.transport.push_channel();

    let handle = session.send_message("hi").unwrap();
    frames.send(Ok(StreamFrame::text_delta("t1", "Half"))).unwrap();
    let mut snapshots = session.subscribe();
    snapshots
        .wait_for(|snapshot| snapshot.status == ChatStatus::Streaming)
        .await
        .unwrap();
    assert!(session.stop());
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(session.status(), ChatStatus::Streaming);

    harness.persistence.insert_thread(persisted_thread());
    assert!(session.hydrate().await.unwrap());
    assert!(session.is_hydrated());
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.messages()[1].text(), "Begin with a question.");
}

#[tokio::test]
async fn finished_stream_invalidates_thread_detail_and_list() {
    let harness = Harness::new();
    harness.persistence.insert_thread(persisted_thread());
    let session = harness.session(SessionOptions::default());
    let cache = &harness.context.cache;

    assert!(session.hydrate().await.unwrap());
    cache.thread_groups().await.unwrap();
    cache.thread("thread-1").await.unwrap();
    let threads_before = harness.persistence.thread_fetches();
    let groups_before = harness.persistence.group_fetches();
    let mut generation = cache.subscribe();
    generation.borrow_and_update();

    harness.transport.push_frames(reply("a2", "Then answer it."));
    session.send_message("And then?").unwrap().await.unwrap();
    assert_eq!(session.status(), ChatStatus::Ready);

    assert!(generation.has_changed().unwrap());
    assert_eq!(*generation.borrow_and_update(), 2);

    cache.thread("thread-1").await.unwrap();
    cache.thread_groups().await.unwrap();
    assert_eq!(harness.persistence.thread_fetches(), threads_before + 1);
    assert_eq!(harness.persistence.group_fetches(), groups_before + 1);
}

#[tokio::test]
async fn hydration_applies_once() {
    let harness = Harness::new();
    harness.persistence.insert_thread(persisted_thread());
    let session = harness.session(SessionOptions::default());

    assert!(session.hydrate().await.unwrap());
    assert!(!session.hydrate().await.unwrap());
    assert_eq!(harness.persistence.thread_fetches(), 1);
}

// ─── Votes ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_vote_rolls_back() {
    let harness = Harness::new();
    harness.persistence.insert_thread(persisted_thread());
    let session = harness.session(SessionOptions::default());
    session.hydrate().await.unwrap();

    harness.persistence.set_fail_votes(true);
    let result = session.vote_message("a1", true).await;

    assert!(result.is_err());
    assert_eq!(session.vote("a1"), None);
    assert_eq!(harness.persistence.vote_requests().len(), 1);
    // Hydration plus the settle refetch.
    assert_eq!(harness.persistence.thread_fetches(), 2);
}

#[tokio::test]
async fn accepted_vote_settles_from_the_server() {
    let harness = Harness::new();
    harness.persistence.insert_thread(persisted_thread());
    let session = harness.session(SessionOptions::default());
    session.hydrate().await.unwrap();

    session.vote_message("a1", false).await.unwrap();
    assert_eq!(session.vote("a1"), Some(false));

    session.vote_message("a1", true).await.unwrap();
    assert_eq!(session.vote("a1"), Some(true));
    assert_eq!(session.subscribe().borrow().votes.get("a1"), Some(&true));
}

// ─── Errors and stop ────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_request_enters_error_and_notifies() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = failures.clone();
    session.set_on_error(Arc::new(move |error: &TransportError| {
        assert!(matches!(error, TransportError::Status { status: 500, .. }));
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    harness.transport.push_rejection(500, "upstream down");
    session.send_message("hi").unwrap().await.unwrap();

    assert_eq!(session.status(), ChatStatus::Error);
    assert!(session.error().unwrap().contains("500"));
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    session.clear_error();
    assert_eq!(session.status(), ChatStatus::Ready);
    assert_eq!(session.error(), None);
}

#[tokio::test]
async fn retry_from_error_is_allowed() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());

    harness.transport.push_rejection(503, "busy");
    session.send_message("hi").unwrap().await.unwrap();
    assert_eq!(session.status(), ChatStatus::Error);

    harness.transport.push_frames(reply("a1", "Back now."));
    session.send_message("hi again").unwrap().await.unwrap();
    assert_eq!(session.status(), ChatStatus::Ready);
    assert_eq!(session.error(), None);
    assert_eq!(session.messages().last().unwrap().text(), "Back now.");
}

#[tokio::test]
async fn error_frame_keeps_partial_text() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    harness.transport.push_frames(vec![
        StreamFrame::start(Some("a1".to_string())),
        StreamFrame::text_delta("t1", "Partial"),
        StreamFrame::error("quota exceeded"),
        StreamFrame::text_delta("t1", " never shown"),
    ]);

    session.send_message("hi").unwrap().await.unwrap();

    assert_eq!(session.status(), ChatStatus::Error);
    assert!(session.error().unwrap().contains("quota exceeded"));
    assert_eq!(session.messages()[1].text(), "Partial");
}

#[tokio::test]
async fn stop_aborts_and_keeps_applied_content() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    let frames = harness.transport.push_channel();

    let handle = session.send_message("hi").unwrap();
    frames.send(Ok(StreamFrame::text_delta("t1", "Half"))).unwrap();
    let mut snapshots = session.subscribe();
    snapshots
        .wait_for(|snapshot| snapshot.status == ChatStatus::Streaming)
        .await
        .unwrap();

    assert!(session.stop());
    assert!(!session.stop());
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(session.status(), ChatStatus::Streaming);
    assert_eq!(session.messages()[1].text(), "Half");

    frames.send(Ok(StreamFrame::text_delta("t1", " more"))).ok();
    harness.transport.push_frames(reply("a2", "Fresh."));
    session.send_message("again").unwrap().await.unwrap();
    assert_eq!(session.status(), ChatStatus::Ready);
    assert_eq!(session.messages().last().unwrap().text(), "Fresh.");
}

#[tokio::test]
async fn closed_session_refuses_sends() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    session.close();
    assert!(session.send_message("hi").is_none());
    assert!(harness.transport.requests().is_empty());
}

// ─── Documents ──────────────────────────────────────────────────────────────

fn document_frames(id: &str, title: &str, deltas: &[&str]) -> Vec<StreamFrame> {
    let mut frames = vec![DocumentFrame::Create {
        id: id.to_string(),
        title: title.to_string(),
        kind: DocumentKind::Text,
    }
    .into_frame()];
    for delta in deltas {
        frames.push(
            DocumentFrame::Delta {
                id: id.to_string(),
                delta: delta.to_string(),
            }
            .into_frame(),
        );
    }
    frames.push(DocumentFrame::Finish { id: id.to_string() }.into_frame());
    frames.push(StreamFrame::finish("stop"));
    frames
}

#[tokio::test]
async fn short_document_opens_centered_and_is_promoted() {
    let harness = Harness::new();
    let policy = AutoOpenPolicy::default();
    let session = harness.session(SessionOptions {
        auto_open: policy.clone(),
        ..SessionOptions::default()
    });
    harness
        .transport
        .push_frames(document_frames("d1", "Outline", &["# Outline\n\n", "Intro"]));

    session.send_message("draft an outline").unwrap().await.unwrap();

    let overlay = harness.context.overlay.visible_artifact().unwrap();
    assert_eq!(overlay.artifact_id, ArtifactId::new(DocumentKind::Text, "d1"));
    assert_eq!(overlay.anchor, policy.centered_anchor());
    assert_eq!(overlay.title, "Outline");

    let saves = harness.persistence.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].0, "d1");
    assert_eq!(saves[0].1.content, "# Outline\n\nIntro");
    assert!(harness.context.drafts.get("d1").is_none());
    assert_eq!(harness.persistence.versions("d1").len(), 1);

    // Document frames are routed, not rendered into the message.
    assert!(session
        .messages()
        .iter()
        .all(|message| message.parts.is_empty() || message.role == MessageRole::User));
}

#[tokio::test]
async fn long_document_opens_once_when_it_crosses_the_band() {
    let harness = Harness::new();
    let session = harness.session(SessionOptions::default());
    let anchor = Rect::new(10.0, 20.0, 300.0, 40.0);
    session.set_artifact_anchor(anchor);

    let chunk = "x".repeat(100);
    let deltas: Vec<&str> = std::iter::repeat(chunk.as_str()).take(8).collect();
    harness
        .transport
        .push_frames(document_frames("d2", "Essay", &deltas));

    let mut overlay = harness.context.overlay.subscribe();
    session.send_message("write the essay").unwrap().await.unwrap();

    let visible = overlay.borrow_and_update().clone().unwrap();
    assert_eq!(visible.anchor, anchor);
    assert_eq!(visible.title, "Essay");

    let saves = harness.persistence.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].1.content.len(), 800);
}

#[tokio::test]
async fn failed_promotion_keeps_the_draft() {
    let harness = Harness::new();
    harness.persistence.set_fail_saves(true);
    let session = harness.session(SessionOptions::default());
    harness
        .transport
        .push_frames(document_frames("d3", "Notes", &["keep me"]));

    session.send_message("take notes").unwrap().await.unwrap();

    let draft = harness.context.drafts.get("d3").unwrap();
    assert_eq!(draft.content, "keep me");
    assert!(!draft.streaming);
    assert_eq!(session.status(), ChatStatus::Ready);
}
