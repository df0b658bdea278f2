//! In-memory collaborators: a scripted chat transport and a persistence
//! service backed by maps. Used by the unit and integration tests and handy
//! for driving a session without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{future, stream, StreamExt};
use shared_types::{
    Document, DocumentKind, SaveDocumentRequest, SendMessageRequest, StreamFrame, Thread,
    ThreadGroup, Vote, VoteRequest,
};
use tokio::sync::mpsc;

use crate::persistence::{Persistence, PersistenceError};
use crate::transport::{ChatTransport, FrameStream, TransportError};

/// Build a persisted version for seeding [`MemoryPersistence`].
pub fn document_version(id: &str, version_number: u32, title: &str, content: &str) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        kind: DocumentKind::Text,
        version_number,
        created_at: Utc::now(),
    }
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Default)]
struct MemoryState {
    threads: HashMap<String, Thread>,
    groups: Vec<ThreadGroup>,
    documents: HashMap<String, Vec<Document>>,
    votes: HashMap<String, bool>,
    fail_votes: bool,
    fail_saves: bool,
    save_delay: Option<Duration>,
    thread_fetches: usize,
    group_fetches: usize,
    latest_fetches: usize,
    version_fetches: usize,
    saves: Vec<(String, SaveDocumentRequest)>,
    vote_requests: Vec<(String, VoteRequest)>,
}

#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
}

impl MemoryPersistence {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_thread(&self, thread: Thread) {
        self.state().threads.insert(thread.id.clone(), thread);
    }

    pub fn set_thread_groups(&self, groups: Vec<ThreadGroup>) {
        self.state().groups = groups;
    }

    /// Replace the version history of a document. Versions are kept sorted.
    pub fn insert_document_versions(&self, id: &str, mut versions: Vec<Document>) {
        versions.sort_by_key(|doc| doc.version_number);
        self.state().documents.insert(id.to_string(), versions);
    }

    pub fn set_fail_votes(&self, fail: bool) {
        self.state().fail_votes = fail;
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.state().fail_saves = fail;
    }

    /// Hold every save for `delay` before it settles.
    pub fn set_save_delay(&self, delay: Duration) {
        self.state().save_delay = Some(delay);
    }

    pub fn thread_fetches(&self) -> usize {
        self.state().thread_fetches
    }

    pub fn group_fetches(&self) -> usize {
        self.state().group_fetches
    }

    pub fn latest_fetches(&self) -> usize {
        self.state().latest_fetches
    }

    pub fn version_fetches(&self) -> usize {
        self.state().version_fetches
    }

    pub fn saves(&self) -> Vec<(String, SaveDocumentRequest)> {
        self.state().saves.clone()
    }

    pub fn vote_requests(&self) -> Vec<(String, VoteRequest)> {
        self.state().vote_requests.clone()
    }

    pub fn versions(&self, id: &str) -> Vec<Document> {
        self.state().documents.get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, PersistenceError> {
        let mut state = self.state();
        state.thread_fetches += 1;
        let mut thread = state
            .threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("thread {thread_id}")))?;

        for message in &thread.messages {
            if let Some(&is_upvoted) = state.votes.get(&message.id) {
                thread.votes.retain(|vote| vote.message_id != message.id);
                thread.votes.push(Vote {
                    message_id: message.id.clone(),
                    is_upvoted,
                });
            }
        }
        Ok(thread)
    }

    async fn fetch_thread_groups(&self) -> Result<Vec<ThreadGroup>, PersistenceError> {
        let mut state = self.state();
        state.group_fetches += 1;
        Ok(state.groups.clone())
    }

    async fn fetch_latest_document(&self, document_id: &str) -> Result<Document, PersistenceError> {
        let mut state = self.state();
        state.latest_fetches += 1;
        state
            .documents
            .get(document_id)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("document {document_id}")))
    }

    async fn fetch_document_version(
        &self,
        document_id: &str,
        version_number: u32,
    ) -> Result<Document, PersistenceError> {
        let mut state = self.state();
        state.version_fetches += 1;
        state
            .documents
            .get(document_id)
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|doc| doc.version_number == version_number)
            })
            .cloned()
            .ok_or_else(|| {
                PersistenceError::NotFound(format!("document {document_id} v{version_number}"))
            })
    }

    async fn save_document(
        &self,
        document_id: &str,
        request: SaveDocumentRequest,
    ) -> Result<Document, PersistenceError> {
        let delay = self.state().save_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.saves.push((document_id.to_string(), request.clone()));
        if state.fail_saves {
            return Err(PersistenceError::Status {
                status: 500,
                body: "save failed".to_string(),
            });
        }

        let versions = state.documents.entry(document_id.to_string()).or_default();
        let version_number = versions.last().map_or(1, |doc| doc.version_number + 1);
        let document = Document {
            id: document_id.to_string(),
            title: request.title,
            content: request.content,
            kind: request.kind,
            version_number,
            created_at: Utc::now(),
        };
        versions.push(document.clone());
        Ok(document)
    }

    async fn submit_vote(
        &self,
        message_id: &str,
        request: VoteRequest,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state();
        state
            .vote_requests
            .push((message_id.to_string(), request.clone()));
        if state.fail_votes {
            return Err(PersistenceError::Status {
                status: 500,
                body: "vote rejected".to_string(),
            });
        }
        state
            .votes
            .insert(message_id.to_string(), request.is_upvoted);
        Ok(())
    }
}

// ============================================================================
// Transport
// ============================================================================

pub type FrameSender = mpsc::UnboundedSender<Result<StreamFrame, TransportError>>;

enum Script {
    Frames(Vec<StreamFrame>),
    Reject { status: u16, body: String },
    Channel(mpsc::UnboundedReceiver<Result<StreamFrame, TransportError>>),
}

/// Replays one queued script per `open`. With nothing queued, a request is
/// answered with a bare `finish`.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<SendMessageRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn scripts(&self) -> MutexGuard<'_, VecDeque<Script>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_frames(&self, frames: Vec<StreamFrame>) {
        self.scripts().push_back(Script::Frames(frames));
    }

    pub fn push_rejection(&self, status: u16, body: impl Into<String>) {
        self.scripts().push_back(Script::Reject {
            status,
            body: body.into(),
        });
    }

    /// Queue a stream fed by hand. Frames are delivered as they are sent;
    /// dropping the sender ends the stream.
    pub fn push_channel(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts().push_back(Script::Channel(rx));
        tx
    }

    pub fn requests(&self) -> Vec<SendMessageRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(&self, request: SendMessageRequest) -> Result<FrameStream, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let script = self.scripts().pop_front();
        match script {
            None => Ok(until_terminal(stream::iter(vec![Ok(StreamFrame::finish(
                "stop",
            ))]))),
            Some(Script::Frames(frames)) => Ok(until_terminal(stream::iter(
                frames.into_iter().map(Ok).collect::<Vec<_>>(),
            ))),
            Some(Script::Reject { status, body }) => Err(TransportError::Status { status, body }),
            Some(Script::Channel(rx)) => Ok(until_terminal(stream::unfold(rx, |mut rx| async {
                rx.recv().await.map(|item| (item, rx))
            }))),
        }
    }
}

/// Same termination rules as the HTTP transport: error frames surface as
/// `Err` and nothing follows a terminal frame or error.
fn until_terminal<S>(frames: S) -> FrameStream
where
    S: futures_util::Stream<Item = Result<StreamFrame, TransportError>> + Send + 'static,
{
    Box::pin(
        frames
            .map(|item| match item {
                Ok(StreamFrame::Error { error_text }) => Err(TransportError::Frame(error_text)),
                other => other,
            })
            .scan(false, |finished, item| {
                if *finished {
                    return future::ready(None);
                }
                *finished = match &item {
                    Ok(frame) => frame.is_terminal(),
                    Err(_) => true,
                };
                future::ready(Some(item))
            }),
    )
}
