//! Document version controller.
//!
//! Navigates and mutates the persisted version history of one document.
//! Selection is either the current (latest) version or an index into the
//! ascending historical numbers `1..latest`, which are read-only.

pub mod debounce;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use shared_types::{Document, DocumentKind, SaveDocumentRequest};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::drafts::{promote_draft, DraftStore};
use crate::persistence::{Persistence, PersistenceError};

pub use debounce::DebouncedTask;

/// Index value used on the wire and in views for "current".
pub const CURRENT_INDEX: isize = -1;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("only the current version can be edited")]
    NotCurrent,

    #[error("document is streaming")]
    Streaming,

    #[error("a save is in flight")]
    SaveInFlight,

    #[error("no historical version selected")]
    NoSelection,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSelection {
    #[default]
    Current,
    /// Index into [`DocumentVersionController::historical_numbers`].
    Historical(usize),
}

impl VersionSelection {
    pub fn index(&self) -> isize {
        match self {
            VersionSelection::Current => CURRENT_INDEX,
            VersionSelection::Historical(index) => *index as isize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersionOptions {
    pub save_debounce: Duration,
}

impl Default for VersionOptions {
    fn default() -> Self {
        Self {
            save_debounce: Duration::from_millis(2000),
        }
    }
}

/// Observable view of the controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VersionView {
    pub selection: VersionSelection,
    pub latest: Option<Document>,
    pub is_saving: bool,
}

#[derive(Default)]
struct VersionState {
    latest: Option<Document>,
    selection: VersionSelection,
    snapshots: HashMap<u32, Document>,
    saves_in_flight: usize,
}

#[derive(Clone)]
pub struct DocumentVersionController {
    document_id: String,
    persistence: Arc<dyn Persistence>,
    drafts: DraftStore,
    options: VersionOptions,
    state: Arc<Mutex<VersionState>>,
    saver: Arc<DebouncedTask>,
    view: Arc<watch::Sender<VersionView>>,
}

impl DocumentVersionController {
    pub fn new(
        document_id: impl Into<String>,
        persistence: Arc<dyn Persistence>,
        drafts: DraftStore,
        options: VersionOptions,
    ) -> Self {
        let (view, _) = watch::channel(VersionView::default());
        Self {
            document_id: document_id.into(),
            persistence,
            drafts,
            options,
            state: Arc::new(Mutex::new(VersionState::default())),
            saver: Arc::new(DebouncedTask::new()),
            view: Arc::new(view),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    fn state(&self) -> MutexGuard<'_, VersionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self) {
        let view = {
            let state = self.state();
            VersionView {
                selection: state.selection,
                latest: state.latest.clone(),
                is_saving: state.saves_in_flight > 0,
            }
        };
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<VersionView> {
        self.view.subscribe()
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn latest(&self) -> Option<Document> {
        self.state().latest.clone()
    }

    pub fn selection(&self) -> VersionSelection {
        self.state().selection
    }

    /// `-1` for current, otherwise the historical index.
    pub fn selected_index(&self) -> isize {
        self.selection().index()
    }

    pub fn is_current_version(&self) -> bool {
        self.selection() == VersionSelection::Current
    }

    /// Ascending historical version numbers, latest excluded.
    pub fn historical_numbers(&self) -> Vec<u32> {
        historical_numbers(self.state().latest.as_ref())
    }

    /// Version number the selection points at.
    pub fn selected_version_number(&self) -> Option<u32> {
        let state = self.state();
        match state.selection {
            VersionSelection::Current => state.latest.as_ref().map(|doc| doc.version_number),
            VersionSelection::Historical(index) => {
                historical_numbers(state.latest.as_ref()).get(index).copied()
            }
        }
    }

    pub fn is_saving(&self) -> bool {
        self.state().saves_in_flight > 0
    }

    /// Step back toward the earliest version. No-op at the earliest index.
    pub fn prev(&self) -> Result<VersionSelection, VersionError> {
        let selection = {
            let mut state = self.state();
            if state.saves_in_flight > 0 {
                return Err(VersionError::SaveInFlight);
            }
            let count = historical_numbers(state.latest.as_ref()).len();
            state.selection = match state.selection {
                VersionSelection::Current if count > 0 => VersionSelection::Historical(count - 1),
                VersionSelection::Current => VersionSelection::Current,
                VersionSelection::Historical(0) => VersionSelection::Historical(0),
                VersionSelection::Historical(index) => VersionSelection::Historical(index - 1),
            };
            state.selection
        };
        self.publish();
        Ok(selection)
    }

    /// Step forward; past the last historical index returns to current.
    pub fn next(&self) -> Result<VersionSelection, VersionError> {
        let selection = {
            let mut state = self.state();
            if state.saves_in_flight > 0 {
                return Err(VersionError::SaveInFlight);
            }
            let count = historical_numbers(state.latest.as_ref()).len();
            state.selection = match state.selection {
                VersionSelection::Historical(index) if index + 1 < count => {
                    VersionSelection::Historical(index + 1)
                }
                _ => VersionSelection::Current,
            };
            state.selection
        };
        self.publish();
        Ok(selection)
    }

    pub fn select_current(&self) {
        self.state().selection = VersionSelection::Current;
        self.publish();
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch the latest version unless a draft for this document is
    /// streaming, in which case the draft is authoritative and `Ok(None)` is
    /// returned. A document that does not exist yet is also `Ok(None)`.
    pub async fn refresh_latest(&self) -> Result<Option<Document>, VersionError> {
        if self.drafts.is_streaming(&self.document_id) {
            tracing::debug!(document_id = %self.document_id, "Latest fetch suppressed while streaming");
            return Ok(None);
        }

        let latest = match self.persistence.fetch_latest_document(&self.document_id).await {
            Ok(document) => document,
            Err(PersistenceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.accept_latest(latest.clone());
        Ok(Some(latest))
    }

    fn accept_latest(&self, latest: Document) {
        {
            let mut state = self.state();
            let count = latest.version_number.saturating_sub(1) as usize;
            if let VersionSelection::Historical(index) = state.selection {
                if index >= count {
                    state.selection = VersionSelection::Current;
                }
            }
            state.latest = Some(latest);
        }
        self.publish();
    }

    /// Historical snapshot by version number, fetched once and cached.
    pub async fn snapshot(&self, version_number: u32) -> Result<Document, VersionError> {
        {
            let state = self.state();
            if let Some(document) = state.snapshots.get(&version_number) {
                return Ok(document.clone());
            }
            if let Some(latest) = state
                .latest
                .as_ref()
                .filter(|doc| doc.version_number == version_number)
            {
                return Ok(latest.clone());
            }
        }

        let document = self
            .persistence
            .fetch_document_version(&self.document_id, version_number)
            .await?;
        self.state()
            .snapshots
            .insert(version_number, document.clone());
        Ok(document)
    }

    /// Document for the current selection.
    pub async fn selected_document(&self) -> Result<Option<Document>, VersionError> {
        match self.selection() {
            VersionSelection::Current => Ok(self.latest()),
            VersionSelection::Historical(_) => match self.selected_version_number() {
                Some(number) => self.snapshot(number).await.map(Some),
                None => Ok(None),
            },
        }
    }

    /// Content that governs display right now: the draft while one exists,
    /// otherwise the latest persisted version.
    pub fn governing_content(&self) -> Option<String> {
        match self.drafts.get(&self.document_id) {
            Some(draft) => Some(draft.content),
            None => self.latest().map(|doc| doc.content),
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Save the selected historical snapshot as the new latest version and
    /// return to current.
    pub async fn restore_selected_version(&self) -> Result<Document, VersionError> {
        if self.drafts.is_streaming(&self.document_id) {
            return Err(VersionError::Streaming);
        }
        if self.is_saving() {
            return Err(VersionError::SaveInFlight);
        }
        let number = match self.selection() {
            VersionSelection::Current => return Err(VersionError::NoSelection),
            VersionSelection::Historical(_) => self
                .selected_version_number()
                .ok_or(VersionError::NoSelection)?,
        };

        let snapshot = self.snapshot(number).await?;
        self.saver.cancel_pending();
        let request = SaveDocumentRequest {
            content: snapshot.content,
            title: snapshot.title,
            kind: snapshot.kind,
        };
        let restored = self.persist(request).await?;
        tracing::info!(
            document_id = %self.document_id,
            from = number,
            version = restored.version_number,
            "Restored historical version"
        );
        self.select_current();
        Ok(restored)
    }

    /// Save edited content as a new version. Only allowed on the current
    /// version while not streaming. With `debounce` the save waits for the
    /// configured quiet period and a later call replaces it; otherwise it
    /// runs now and any pending save is dropped.
    pub async fn save_content(&self, content: String, debounce: bool) -> Result<(), VersionError> {
        if !self.is_current_version() {
            return Err(VersionError::NotCurrent);
        }
        if self.drafts.is_streaming(&self.document_id) {
            return Err(VersionError::Streaming);
        }

        if !debounce {
            self.saver.cancel_pending();
            if self.is_unchanged(&content) {
                return Ok(());
            }
            let request = self.save_request(content);
            self.persist(request).await?;
            return Ok(());
        }

        let controller = self.clone();
        self.saver.schedule(self.options.save_debounce, async move {
            if controller.is_unchanged(&content) {
                return;
            }
            let request = controller.save_request(content);
            if let Err(e) = controller.persist(request).await {
                tracing::warn!(
                    document_id = %controller.document_id,
                    error = %e,
                    "Debounced save failed"
                );
            }
        });
        Ok(())
    }

    pub fn cancel_pending_save(&self) -> bool {
        self.saver.cancel_pending()
    }

    pub fn has_pending_save(&self) -> bool {
        self.saver.is_pending()
    }

    fn is_unchanged(&self, content: &str) -> bool {
        self.state()
            .latest
            .as_ref()
            .is_some_and(|doc| doc.content == content)
    }

    fn save_request(&self, content: String) -> SaveDocumentRequest {
        let state = self.state();
        let (title, kind) = state
            .latest
            .as_ref()
            .map(|doc| (doc.title.clone(), doc.kind))
            .unwrap_or_else(|| (String::new(), DocumentKind::default()));
        SaveDocumentRequest {
            content,
            title,
            kind,
        }
    }

    async fn persist(&self, request: SaveDocumentRequest) -> Result<Document, VersionError> {
        let saving = SaveInFlight::begin(self);
        let result = self
            .persistence
            .save_document(&self.document_id, request)
            .await;
        if let Ok(document) = &result {
            self.state().latest = Some(document.clone());
        }
        drop(saving);

        match result {
            Ok(document) => {
                tracing::debug!(
                    document_id = %self.document_id,
                    version = document.version_number,
                    "Document saved"
                );
                Ok(document)
            }
            Err(e) => {
                tracing::warn!(document_id = %self.document_id, error = %e, "Document save failed");
                Err(e.into())
            }
        }
    }

    /// Promote this document's finished draft and adopt the saved version.
    pub async fn promote_draft(&self) -> Result<Option<Document>, VersionError> {
        let promoted =
            promote_draft(self.persistence.as_ref(), &self.drafts, &self.document_id).await?;
        if let Some(document) = &promoted {
            self.accept_latest(document.clone());
        }
        Ok(promoted)
    }

    /// Refresh the latest version whenever this document's draft goes away,
    /// so the persisted version takes over once streaming settles.
    pub fn watch_drafts(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let mut drafts = self.drafts.subscribe(&self.document_id);
        tokio::spawn(async move {
            let mut had_draft = drafts.borrow_and_update().is_some();
            while drafts.changed().await.is_ok() {
                let has_draft = drafts.borrow_and_update().is_some();
                if had_draft && !has_draft {
                    if let Err(e) = controller.refresh_latest().await {
                        tracing::warn!(
                            document_id = %controller.document_id,
                            error = %e,
                            "Refresh after draft settled failed"
                        );
                    }
                }
                had_draft = has_draft;
            }
        })
    }
}

/// Marks a save as in flight until dropped, including when the saving
/// future is cancelled mid-request.
struct SaveInFlight<'a> {
    controller: &'a DocumentVersionController,
}

impl<'a> SaveInFlight<'a> {
    fn begin(controller: &'a DocumentVersionController) -> Self {
        controller.state().saves_in_flight += 1;
        controller.publish();
        Self { controller }
    }
}

impl Drop for SaveInFlight<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.controller.state();
            state.saves_in_flight = state.saves_in_flight.saturating_sub(1);
        }
        self.controller.publish();
    }
}

fn historical_numbers(latest: Option<&Document>) -> Vec<u32> {
    match latest {
        Some(doc) => (1..doc.version_number).collect(),
        None => Vec::new(),
    }
}
