//! Chat session controller.
//!
//! Owns the message tree and status of one thread, drives one stream at a
//! time through the [`ChatTransport`], and routes document frames into the
//! draft store and overlay. Observers follow a [`SessionSnapshot`] over a
//! `watch` channel.

pub mod frames;
pub mod status;
pub mod tree;
pub mod votes;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use shared_types::{
    new_message_id, ArtifactId, DocumentFrame, Message, Rect, SendMessageRequest, StreamFrame,
    VoteRequest,
};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::drafts::{promote_draft, AutoOpenPolicy, AutoOpenTracker, DraftStore};
use crate::overlay::OverlayStore;
use crate::persistence::{PersistenceError, ThreadCache};
use crate::transport::{ChatTransport, TransportError};

pub use frames::MessageAssembler;
pub use status::{ChatStatus, StatusEvent};
pub use tree::MessageTree;
pub use votes::VoteMap;

pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Send one greeting request when the session opens with no messages.
    pub auto_greeting: bool,
    pub auto_open: AutoOpenPolicy,
    pub max_thread_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_greeting: false,
            auto_open: AutoOpenPolicy::default(),
            max_thread_depth: 10_000,
        }
    }
}

/// Everything an observer needs to render the session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub thread_id: String,
    pub status: ChatStatus,
    /// Active path, root first.
    pub messages: Vec<Message>,
    pub votes: HashMap<String, bool>,
    pub error: Option<String>,
}

struct SessionState {
    status: ChatStatus,
    tree: MessageTree,
    votes: VoteMap,
    error: Option<String>,
    hydrated: bool,
    greeted: bool,
    closed: bool,
    /// Bumped per request; frames from an older stream are dropped.
    stream_generation: u64,
    stream_task: Option<AbortHandle>,
    assembler: Option<MessageAssembler>,
    auto_open: AutoOpenTracker,
    artifact_anchor: Option<Rect>,
}

struct SessionInner {
    thread_id: String,
    transport: Arc<dyn ChatTransport>,
    cache: ThreadCache,
    drafts: DraftStore,
    overlay: OverlayStore,
    options: SessionOptions,
    state: Mutex<SessionState>,
    snapshot: watch::Sender<SessionSnapshot>,
    on_error: Mutex<Option<ErrorCallback>>,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn new(
        thread_id: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
        cache: ThreadCache,
        drafts: DraftStore,
        overlay: OverlayStore,
        options: SessionOptions,
    ) -> Self {
        let thread_id = thread_id.into();
        let state = SessionState {
            status: ChatStatus::Ready,
            tree: MessageTree::new(options.max_thread_depth),
            votes: VoteMap::default(),
            error: None,
            hydrated: false,
            greeted: false,
            closed: false,
            stream_generation: 0,
            stream_task: None,
            assembler: None,
            auto_open: AutoOpenTracker::new(options.auto_open.clone()),
            artifact_anchor: None,
        };
        let (snapshot, _) = watch::channel(SessionSnapshot {
            thread_id: thread_id.clone(),
            ..SessionSnapshot::default()
        });
        Self {
            inner: Arc::new(SessionInner {
                thread_id,
                transport,
                cache,
                drafts,
                overlay,
                options,
                state: Mutex::new(state),
                snapshot,
                on_error: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self) {
        let snapshot = {
            let state = self.state();
            SessionSnapshot {
                thread_id: self.inner.thread_id.clone(),
                status: state.status,
                messages: state.tree.active_path(),
                votes: state.votes.as_map().clone(),
                error: state.error.clone(),
            }
        };
        self.inner.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn transition(&self, event: StatusEvent) -> ChatStatus {
        let mut state = self.state();
        self.transition_locked(&mut state, event)
    }

    fn transition_locked(&self, state: &mut SessionState, event: StatusEvent) -> ChatStatus {
        let from = state.status;
        state.status = from.next(event);
        if from != state.status {
            tracing::debug!(
                thread_id = %self.inner.thread_id,
                from = ?from,
                to = ?state.status,
                event = ?event,
                "Chat status changed"
            );
        }
        state.status
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn thread_id(&self) -> &str {
        &self.inner.thread_id
    }

    pub fn status(&self) -> ChatStatus {
        self.state().status
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Active path, root first.
    pub fn messages(&self) -> Vec<Message> {
        self.state().tree.active_path()
    }

    pub fn vote(&self, message_id: &str) -> Option<bool> {
        self.state().votes.get(message_id)
    }

    pub fn is_hydrated(&self) -> bool {
        self.state().hydrated
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.inner.drafts
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.inner.overlay
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn set_on_error(&self, callback: ErrorCallback) {
        *self.inner.on_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Anchor used when a growing draft opens the overlay.
    pub fn set_artifact_anchor(&self, anchor: Rect) {
        self.state().artifact_anchor = Some(anchor);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Hydrate, then greet when configured.
    pub async fn open(&self) -> Result<(), PersistenceError> {
        self.hydrate().await?;
        if self.inner.options.auto_greeting {
            self.greet();
        }
        Ok(())
    }

    /// Apply persisted thread detail once. Skipped while a stream task is
    /// running so streamed content is never clobbered; a stopped stream no
    /// longer blocks it. Returns whether the detail was applied.
    pub async fn hydrate(&self) -> Result<bool, PersistenceError> {
        if self.state().hydrated {
            return Ok(false);
        }

        let thread = match self.inner.cache.thread(&self.inner.thread_id).await {
            Ok(thread) => thread,
            Err(PersistenceError::NotFound(_)) => {
                tracing::debug!(thread_id = %self.inner.thread_id, "No persisted thread; starting fresh");
                self.state().hydrated = true;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        {
            let mut state = self.state();
            if state.hydrated {
                return Ok(false);
            }
            if state.stream_task.is_some() {
                tracing::info!(
                    thread_id = %self.inner.thread_id,
                    status = ?state.status,
                    "Skipping hydration while a request is in flight"
                );
                return Ok(false);
            }
            state.tree = MessageTree::from_thread(&thread, self.inner.options.max_thread_depth);
            state.votes = VoteMap::from_votes(&thread.votes);
            state.hydrated = true;
        }
        tracing::info!(
            thread_id = %self.inner.thread_id,
            messages = thread.messages.len(),
            "Thread hydrated"
        );
        self.publish();
        Ok(true)
    }

    /// Send one synthetic greeting request. Fires at most once per session
    /// and only while the message list is empty.
    pub fn greet(&self) -> Option<JoinHandle<()>> {
        let handle = {
            let mut state = self.state();
            if state.greeted || state.closed || !state.tree.is_empty() || state.stream_task.is_some()
            {
                return None;
            }
            state.greeted = true;
            tracing::info!(thread_id = %self.inner.thread_id, "Sending greeting");
            let request = SendMessageRequest {
                id: self.inner.thread_id.clone(),
                message: None,
                previous_message_id: None,
                greeting: true,
            };
            self.start_stream(&mut state, request)
        };
        self.publish();
        Some(handle)
    }

    /// Append a user message and stream the reply. Blank text, a closed
    /// session, or a request already in flight make this a no-op.
    pub fn send_message(&self, text: &str) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() {
            tracing::debug!(thread_id = %self.inner.thread_id, "Ignoring blank message");
            return None;
        }

        let handle = {
            let mut state = self.state();
            if state.closed || self.inner.thread_id.trim().is_empty() {
                tracing::debug!("Ignoring message without an active thread");
                return None;
            }
            if state.stream_task.is_some() {
                tracing::debug!(thread_id = %self.inner.thread_id, "Ignoring message while a request is in flight");
                return None;
            }

            let previous = state.tree.leaf_id().map(str::to_string);
            let message = Message::user(text, previous.clone());
            state.tree.push(message.clone());
            state.error = None;
            let request = SendMessageRequest {
                id: self.inner.thread_id.clone(),
                message: Some(message),
                previous_message_id: previous,
                greeting: false,
            };
            self.start_stream(&mut state, request)
        };
        self.publish();
        Some(handle)
    }

    /// Abort the in-flight stream. Status and applied content stay as they
    /// are.
    pub fn stop(&self) -> bool {
        let task = self.state().stream_task.take();
        let Some(task) = task else {
            return false;
        };
        task.abort();
        self.transition(StatusEvent::Stop);
        tracing::info!(thread_id = %self.inner.thread_id, "Stream stopped");
        self.publish();
        true
    }

    pub fn clear_error(&self) {
        self.state().error = None;
        self.transition(StatusEvent::Clear);
        self.publish();
    }

    /// Stop streaming and refuse further sends.
    pub fn close(&self) {
        self.stop();
        self.state().closed = true;
    }

    pub fn select_leaf(&self, message_id: &str) -> bool {
        let selected = self.state().tree.select_leaf(message_id);
        if selected {
            self.publish();
        }
        selected
    }

    // ------------------------------------------------------------------
    // Votes
    // ------------------------------------------------------------------

    /// Optimistically record a vote, roll it back if the server refuses,
    /// and always refetch thread detail afterwards for authoritative votes.
    pub async fn vote_message(
        &self,
        message_id: &str,
        is_upvoted: bool,
    ) -> Result<(), PersistenceError> {
        let previous = self.state().votes.apply_optimistic(message_id, is_upvoted);
        self.publish();

        let result = self
            .inner
            .cache
            .persistence()
            .submit_vote(message_id, VoteRequest { is_upvoted })
            .await;
        if let Err(e) = &result {
            tracing::warn!(message_id = %message_id, error = %e, "Vote rejected; rolling back");
            self.state().votes.rollback(message_id, previous);
            self.publish();
        }

        self.inner.cache.invalidate_thread(&self.inner.thread_id);
        match self.inner.cache.thread(&self.inner.thread_id).await {
            Ok(thread) => {
                self.state().votes = VoteMap::from_votes(&thread.votes);
                self.publish();
            }
            Err(e) => {
                tracing::debug!(thread_id = %self.inner.thread_id, error = %e, "Vote settle refetch failed");
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Spawn the stream task while the caller holds the state lock, so the
    /// task cannot observe or settle state before its abort handle is
    /// registered.
    fn start_stream(&self, state: &mut SessionState, request: SendMessageRequest) -> JoinHandle<()> {
        self.transition_locked(state, StatusEvent::Submit);
        state.stream_generation += 1;
        state.assembler = None;
        let generation = state.stream_generation;

        let session = self.clone();
        let handle = tokio::spawn(async move { session.run_stream(request, generation).await });
        state.stream_task = Some(handle.abort_handle());
        handle
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().stream_generation == generation
    }

    async fn run_stream(&self, request: SendMessageRequest, generation: u64) {
        tracing::debug!(thread_id = %request.id, generation, "Stream task started");
        let mut frames = match self.inner.transport.open(request).await {
            Ok(frames) => frames,
            Err(e) => {
                self.fail(e, generation);
                return;
            }
        };

        while let Some(item) = frames.next().await {
            if !self.is_current(generation) {
                return;
            }
            match item {
                Ok(frame) => self.on_frame(frame).await,
                Err(e) => {
                    self.fail(e, generation);
                    return;
                }
            }
        }
        self.on_finish(generation);
    }

    async fn on_frame(&self, frame: StreamFrame) {
        if self.status() == ChatStatus::Submitted {
            self.transition(StatusEvent::FirstFrame);
        }

        match frame.document_frame() {
            Ok(Some(document)) => {
                self.route_document(document).await;
                self.publish();
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Malformed document frame; skipping");
                return;
            }
        }

        {
            let mut state = self.state();
            match &frame {
                StreamFrame::Start { message_id, .. } => {
                    ensure_assistant(&mut state, message_id.clone());
                }
                StreamFrame::StartStep
                | StreamFrame::FinishStep
                | StreamFrame::Finish { .. }
                | StreamFrame::Abort { .. }
                | StreamFrame::Error { .. } => {}
                _ => {
                    ensure_assistant(&mut state, None);
                    let state = &mut *state;
                    if let Some(assembler) = state.assembler.as_mut() {
                        if let Some(message) = state.tree.get_mut(assembler.message_id()) {
                            assembler.apply(message, &frame);
                        }
                    }
                }
            }
        }
        self.publish();
    }

    async fn route_document(&self, frame: DocumentFrame) {
        let drafts = &self.inner.drafts;
        match frame {
            DocumentFrame::Create { id, title, kind } => {
                drafts.set_empty_draft(&id, title, kind);
                self.state().auto_open.reset(&id);
            }
            DocumentFrame::Update { id } => {
                drafts.begin_update(&id);
                self.state().auto_open.reset(&id);
            }
            DocumentFrame::Delta { id, delta } => {
                let Some(draft) = drafts.append_draft_delta(&id, &delta) else {
                    tracing::debug!(document_id = %id, "Delta for unknown draft dropped");
                    return;
                };
                let anchor = {
                    let mut state = self.state();
                    if state.auto_open.on_delta(&draft) {
                        Some(
                            state
                                .artifact_anchor
                                .unwrap_or_else(|| state.auto_open.policy().centered_anchor()),
                        )
                    } else {
                        None
                    }
                };
                if let Some(anchor) = anchor {
                    self.inner.overlay.open_artifact(
                        ArtifactId::new(draft.kind, &draft.id),
                        anchor,
                        draft.title.clone(),
                    );
                }
            }
            DocumentFrame::Finish { id } => {
                let Some(draft) = drafts.finish_draft(&id) else {
                    return;
                };
                let anchor = self.state().auto_open.on_finish(&draft);
                if let Some(anchor) = anchor {
                    self.inner.overlay.open_artifact(
                        ArtifactId::new(draft.kind, &draft.id),
                        anchor,
                        draft.title.clone(),
                    );
                }
                let persistence = self.inner.cache.persistence().clone();
                if let Err(e) = promote_draft(persistence.as_ref(), drafts, &id).await {
                    tracing::warn!(document_id = %id, error = %e, "Draft kept after failed promotion");
                }
            }
        }
    }

    fn on_finish(&self, generation: u64) {
        {
            let mut state = self.state();
            if state.stream_generation != generation {
                return;
            }
            let state = &mut *state;
            if let Some(assembler) = state.assembler.take() {
                if let Some(message) = state.tree.get_mut(assembler.message_id()) {
                    assembler.finish(message);
                }
            }
            state.stream_task = None;
        }
        self.transition(StatusEvent::Finish);
        tracing::info!(thread_id = %self.inner.thread_id, "Stream finished");

        self.inner.cache.invalidate_thread(&self.inner.thread_id);
        self.inner.cache.invalidate_thread_list();
        self.publish();
    }

    fn fail(&self, error: TransportError, generation: u64) {
        {
            let mut state = self.state();
            if state.stream_generation != generation {
                return;
            }
            state.stream_task = None;
            state.error = Some(error.to_string());
        }
        self.transition(StatusEvent::Fail);
        tracing::warn!(thread_id = %self.inner.thread_id, error = %error, "Stream failed");
        self.publish();

        let callback = self
            .inner
            .on_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(&error);
        }
    }
}

/// Make sure an assistant message is being assembled, creating it under the
/// current leaf when needed. `id` forces a fresh message with that id.
fn ensure_assistant(state: &mut SessionState, id: Option<String>) {
    if let Some(assembler) = &state.assembler {
        match &id {
            Some(id) if id != assembler.message_id() => {}
            _ => return,
        }
    }
    let id = id.unwrap_or_else(new_message_id);
    let parent = state.tree.leaf_id().map(str::to_string);
    state.tree.push(Message::assistant(id.clone(), parent));
    state.assembler = Some(MessageAssembler::new(id));
}
