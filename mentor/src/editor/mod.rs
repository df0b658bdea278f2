//! Live document editor.
//!
//! Binds a [`GhostTextBuffer`] and an [`EditorState`] to one document. While
//! the document streams, draft snapshots flow into the ghost span and the
//! editor is read-only; once settled, authoritative content is reconciled
//! into the model and user edits are reported back for saving.

pub mod ghost;
pub mod model;
pub mod transaction;

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::drafts::Draft;

pub use ghost::{GhostSpan, GhostTextBuffer, Observed};
pub use model::{Block, BlockKind, Mark, Position, RichDocument, Span};
pub use transaction::{Applied, EditorState, Origin, Step, Transaction, TransactionMeta};

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("editor is read-only")]
    ReadOnly,

    #[error("no ghost span is open")]
    NoGhostSpan,

    #[error("a ghost span is already open")]
    GhostSpanOpen,

    #[error("invalid position {block}:{offset}")]
    InvalidPosition { block: usize, offset: usize },
}

#[derive(Debug)]
pub struct DocumentEditor {
    state: EditorState,
    ghost: GhostTextBuffer,
    streaming: bool,
    viewing_current: bool,
}

impl Default for DocumentEditor {
    fn default() -> Self {
        Self::new("")
    }
}

impl DocumentEditor {
    pub fn new(content: &str) -> Self {
        Self {
            state: EditorState::new(RichDocument::from_markdown(content)),
            ghost: GhostTextBuffer::new(),
            streaming: false,
            viewing_current: true,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn document(&self) -> &RichDocument {
        self.state.doc()
    }

    /// Committed content as markdown.
    pub fn content(&self) -> String {
        self.state.doc().committed_markdown()
    }

    pub fn ghost(&self) -> &GhostTextBuffer {
        &self.ghost
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_editable(&self) -> bool {
        !self.streaming && self.viewing_current
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn set_viewing_current(&mut self, viewing_current: bool) {
        self.viewing_current = viewing_current;
    }

    /// Follow a draft snapshot. The first streaming snapshot clears the
    /// model and opens the ghost span at its start; later snapshots push
    /// their new suffix. A finished draft is committed as one undo step, or
    /// reconciled in directly when its stream was never observed.
    pub fn sync_draft(&mut self, draft: &Draft) -> Result<(), EditorError> {
        if draft.streaming {
            if !self.ghost.is_open() {
                self.state.apply(&Transaction::reconcile(RichDocument::new()))?;
            }
            self.streaming = true;
            self.ghost
                .observe(&mut self.state, &draft.content, Position::default())?;
            return Ok(());
        }

        if self.ghost.is_open() {
            self.ghost
                .observe(&mut self.state, &draft.content, Position::default())?;
            self.ghost.finish(&mut self.state, true)?;
            self.streaming = false;
            tracing::debug!(document_id = %draft.id, "Ghost text committed");
            return Ok(());
        }
        self.streaming = false;
        self.reconcile(&draft.content)?;
        Ok(())
    }

    /// Replace the model with `authoritative` when the two diverge. Never
    /// touches the model while streaming. Returns whether a replacement
    /// happened; the replacement is excluded from history and saving.
    pub fn reconcile(&mut self, authoritative: &str) -> Result<bool, EditorError> {
        if self.streaming {
            return Ok(false);
        }
        let target = RichDocument::from_markdown(authoritative);
        if target.to_markdown() == self.content() {
            return Ok(false);
        }
        self.ghost.cancel(&mut self.state)?;
        self.state.apply(&Transaction::reconcile(target))?;
        Ok(true)
    }

    /// Apply an edit from the user. Returns the content to route through
    /// the save path, or `None` when the transaction suppresses saving.
    pub fn apply_user_edit(&mut self, tx: Transaction) -> Result<Option<String>, EditorError> {
        if !self.is_editable() {
            return Err(EditorError::ReadOnly);
        }
        let applied = self.state.apply(&tx)?;
        Ok(self.save_payload(applied.changed && !applied.meta.suppress_save))
    }

    pub fn undo(&mut self) -> Result<Option<String>, EditorError> {
        if !self.is_editable() {
            return Err(EditorError::ReadOnly);
        }
        let undone = self.state.undo();
        Ok(self.save_payload(undone))
    }

    pub fn redo(&mut self) -> Result<Option<String>, EditorError> {
        if !self.is_editable() {
            return Err(EditorError::ReadOnly);
        }
        let redone = self.state.redo();
        Ok(self.save_payload(redone))
    }

    fn save_payload(&self, save: bool) -> Option<String> {
        save.then(|| self.content())
    }
}

/// Feed every snapshot of one draft into `editor` until the draft store
/// goes away.
pub async fn follow_draft(
    editor: Arc<Mutex<DocumentEditor>>,
    mut drafts: watch::Receiver<Option<Draft>>,
) {
    loop {
        let draft = drafts.borrow_and_update().clone();
        if let Some(draft) = draft {
            let mut editor = editor.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = editor.sync_draft(&draft) {
                tracing::warn!(document_id = %draft.id, error = %e, "Draft sync failed");
            }
        }
        if drafts.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::DocumentKind;

    fn draft(content: &str, streaming: bool) -> Draft {
        Draft {
            id: "doc".to_string(),
            title: "Doc".to_string(),
            kind: DocumentKind::Text,
            content: content.to_string(),
            streaming,
        }
    }

    #[test]
    fn read_only_while_streaming_or_historical() {
        let mut editor = DocumentEditor::new("text");
        assert!(editor.is_editable());

        editor.set_streaming(true);
        assert!(matches!(
            editor.apply_user_edit(Transaction::user().insert_text(Position::new(0, 0), "x")),
            Err(EditorError::ReadOnly)
        ));

        editor.set_streaming(false);
        editor.set_viewing_current(false);
        assert!(!editor.is_editable());
        assert!(matches!(editor.undo(), Err(EditorError::ReadOnly)));
    }

    #[test]
    fn streamed_draft_commits_once() {
        let mut editor = DocumentEditor::new("old version");
        editor.sync_draft(&draft("# New", true)).unwrap();
        assert!(!editor.is_editable());
        assert_eq!(editor.content(), "");
        editor.sync_draft(&draft("# New\n\nBody", true)).unwrap();
        assert_eq!(editor.document().ghost_text(), "# New\n\nBody");

        editor.sync_draft(&draft("# New\n\nBody text", false)).unwrap();
        assert!(editor.is_editable());
        assert_eq!(editor.content(), "# New\n\nBody text");
        assert_eq!(editor.state().undo_depth(), 1);
    }

    #[test]
    fn reconcile_replaces_divergent_content_without_saving() {
        let mut editor = DocumentEditor::new("v1");
        assert!(!editor.reconcile("v1").unwrap());
        assert!(editor.reconcile("restored v1").unwrap());
        assert_eq!(editor.content(), "restored v1");
        assert!(!editor.state().can_undo());

        editor.set_streaming(true);
        assert!(!editor.reconcile("ignored").unwrap());
        assert_eq!(editor.content(), "restored v1");
    }

    #[test]
    fn user_edits_report_content_for_saving() {
        let mut editor = DocumentEditor::new("Hello");
        let saved = editor
            .apply_user_edit(Transaction::user().insert_text(Position::new(0, 5), " there"))
            .unwrap();
        assert_eq!(saved.as_deref(), Some("Hello there"));

        let suppressed = editor
            .apply_user_edit(
                Transaction::user()
                    .insert_text(Position::new(0, 0), ">")
                    .suppress_save(true),
            )
            .unwrap();
        assert_eq!(suppressed, None);

        assert_eq!(editor.undo().unwrap().as_deref(), Some("Hello there"));
        assert_eq!(editor.redo().unwrap().as_deref(), Some(">Hello there"));
    }

    #[tokio::test]
    async fn follow_draft_tracks_store_updates() {
        let drafts = crate::drafts::DraftStore::new();
        drafts.set_empty_draft("doc", "Doc", DocumentKind::Text);
        let editor = Arc::new(Mutex::new(DocumentEditor::default()));
        let task = tokio::spawn(follow_draft(editor.clone(), drafts.subscribe("doc")));

        drafts.append_draft_delta("doc", "streamed");
        drafts.finish_draft("doc");

        for _ in 0..20 {
            tokio::task::yield_now().await;
            let content = editor.lock().unwrap().content();
            if content == "streamed" {
                break;
            }
        }
        let editor = editor.lock().unwrap();
        assert_eq!(editor.content(), "streamed");
        assert!(!editor.is_streaming());
        drop(editor);
        task.abort();
    }
}
