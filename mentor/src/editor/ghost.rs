//! Ghost text: streamed text shown inside the document as an uncommitted,
//! ghost-marked span. Pushes stay out of history; `finish` commits the span
//! as exactly one undoable transaction.

use super::model::{Mark, Position, RichDocument};
use super::transaction::{Applied, EditorState, Origin, Step, Transaction};
use super::EditorError;

/// Location of the open span. The span never crosses a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GhostSpan {
    pub start: Position,
    /// Length in chars.
    pub len: usize,
}

impl GhostSpan {
    pub fn end(&self) -> Position {
        Position::new(self.start.block, self.start.offset + self.len)
    }
}

/// What [`GhostTextBuffer::observe`] did with a new content snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Unchanged,
    Appended,
    /// Content no longer extends what was buffered; the span was rebuilt.
    Restarted,
}

#[derive(Debug, Default)]
pub struct GhostTextBuffer {
    span: Option<GhostSpan>,
    buffered: String,
}

fn ghost_transaction() -> Transaction {
    Transaction::new(Origin::Ghost)
        .add_to_history(false)
        .suppress_save(true)
}

impl GhostTextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.span.is_some()
    }

    pub fn span(&self) -> Option<GhostSpan> {
        self.span
    }

    /// Text pushed into the open span so far.
    pub fn buffered(&self) -> &str {
        &self.buffered
    }

    /// Open an empty span at `at`.
    pub fn start(&mut self, state: &EditorState, at: Position) -> Result<(), EditorError> {
        if self.span.is_some() {
            return Err(EditorError::GhostSpanOpen);
        }
        state.doc().check(at)?;
        self.span = Some(GhostSpan { start: at, len: 0 });
        self.buffered.clear();
        Ok(())
    }

    /// Append `delta` to the open span.
    pub fn push(&mut self, state: &mut EditorState, delta: &str) -> Result<(), EditorError> {
        let span = self.span.ok_or(EditorError::NoGhostSpan)?;
        if delta.is_empty() {
            return Ok(());
        }
        let tx = ghost_transaction().step(Step::InsertText {
            at: span.end(),
            text: delta.to_string(),
            marks: vec![Mark::Ghost],
        });
        state.apply(&tx)?;
        self.span = Some(GhostSpan {
            len: span.len + delta.chars().count(),
            ..span
        });
        self.buffered.push_str(delta);
        Ok(())
    }

    /// Bring the span in line with a full content snapshot. Opens a span at
    /// `at` when none is open, pushes only the unseen suffix, and restarts
    /// the span when the snapshot shrank or diverged from what is buffered.
    pub fn observe(
        &mut self,
        state: &mut EditorState,
        content: &str,
        at: Position,
    ) -> Result<Observed, EditorError> {
        let Some(span) = self.span else {
            self.start(state, at)?;
            self.push(state, content)?;
            return Ok(if content.is_empty() {
                Observed::Unchanged
            } else {
                Observed::Appended
            });
        };

        if let Some(delta) = content.strip_prefix(self.buffered.as_str()) {
            if delta.is_empty() {
                return Ok(Observed::Unchanged);
            }
            let delta = delta.to_string();
            self.push(state, &delta)?;
            return Ok(Observed::Appended);
        }

        tracing::debug!(
            buffered = self.buffered.len(),
            observed = content.len(),
            "Ghost content shrank; restarting span"
        );
        self.cancel(state)?;
        self.start(state, span.start)?;
        self.push(state, content)?;
        Ok(Observed::Restarted)
    }

    /// Replace the span with permanent content as one undoable transaction.
    /// With `adopt_marks` the buffered text is parsed as markdown and keeps
    /// its block structure and formatting; otherwise it lands as plain text.
    pub fn finish(
        &mut self,
        state: &mut EditorState,
        adopt_marks: bool,
    ) -> Result<Applied, EditorError> {
        let span = self.span.ok_or(EditorError::NoGhostSpan)?;
        let text = std::mem::take(&mut self.buffered);

        let mut tx = Transaction::new(Origin::Ghost).step(Step::DeleteRange {
            from: span.start,
            to: span.end(),
        });
        if !text.is_empty() {
            tx = tx.step(if adopt_marks {
                Step::InsertFragment {
                    at: span.start,
                    fragment: RichDocument::from_markdown(&text),
                }
            } else {
                Step::InsertText {
                    at: span.start,
                    text,
                    marks: Vec::new(),
                }
            });
        }

        let applied = state.apply(&tx)?;
        self.span = None;
        Ok(applied)
    }

    /// Drop the span without committing. Returns whether one was open.
    pub fn cancel(&mut self, state: &mut EditorState) -> Result<bool, EditorError> {
        let Some(span) = self.span.take() else {
            return Ok(false);
        };
        self.buffered.clear();
        if span.len > 0 {
            let tx = ghost_transaction().step(Step::DeleteRange {
                from: span.start,
                to: span.end(),
            });
            state.apply(&tx)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(markdown: &str) -> EditorState {
        EditorState::new(RichDocument::from_markdown(markdown))
    }

    #[test]
    fn pushes_render_as_ghost_without_history() {
        let mut state = state("Intro ");
        let mut ghost = GhostTextBuffer::new();
        let end = state.doc().end();
        ghost.start(&state, end).unwrap();
        for delta in ["Hel", "lo wor", "ld!"] {
            ghost.push(&mut state, delta).unwrap();
        }

        assert_eq!(state.doc().ghost_text(), "Hello world!");
        assert_eq!(state.doc().committed_markdown(), "Intro");
        assert!(!state.can_undo());
        assert_eq!(ghost.span().unwrap().len, 12);
    }

    #[test]
    fn finish_commits_as_one_undo_step() {
        let mut state = state("Intro");
        let mut ghost = GhostTextBuffer::new();
        let end = state.doc().end();
        ghost.start(&state, end).unwrap();
        for delta in [" one", " two", " three"] {
            ghost.push(&mut state, delta).unwrap();
        }

        let applied = ghost.finish(&mut state, false).unwrap();
        assert!(applied.changed);
        assert!(!state.doc().has_ghost());
        assert_eq!(state.doc().plain_text(), "Intro one two three");
        assert_eq!(state.undo_depth(), 1);

        state.undo();
        assert_eq!(state.doc().plain_text(), "Intro");
        assert!(!state.doc().has_ghost());
    }

    #[test]
    fn finish_with_adopt_marks_parses_markdown() {
        let mut state = EditorState::default();
        let mut ghost = GhostTextBuffer::new();
        ghost.start(&state, Position::default()).unwrap();
        ghost.push(&mut state, "# Plan\n\nStep **one**").unwrap();
        ghost.finish(&mut state, true).unwrap();
        assert_eq!(state.doc().to_markdown(), "# Plan\n\nStep **one**");
    }

    #[test]
    fn observe_pushes_only_the_new_suffix() {
        let mut state = EditorState::default();
        let mut ghost = GhostTextBuffer::new();
        let at = Position::default();

        assert_eq!(ghost.observe(&mut state, "Hel", at).unwrap(), Observed::Appended);
        assert_eq!(ghost.observe(&mut state, "Hello", at).unwrap(), Observed::Appended);
        assert_eq!(ghost.observe(&mut state, "Hello", at).unwrap(), Observed::Unchanged);
        assert_eq!(state.doc().ghost_text(), "Hello");
    }

    #[test]
    fn shrinking_content_restarts_the_span() {
        let mut state = state("Keep");
        let mut ghost = GhostTextBuffer::new();
        let at = state.doc().end();

        ghost.observe(&mut state, " first draft", at).unwrap();
        assert_eq!(
            ghost.observe(&mut state, " sec", at).unwrap(),
            Observed::Restarted
        );
        assert_eq!(state.doc().ghost_text(), " sec");
        assert_eq!(state.doc().plain_text(), "Keep sec");
        assert_eq!(ghost.span().unwrap().start, at);
    }

    #[test]
    fn cancel_discards_without_commit() {
        let mut state = state("Body");
        let mut ghost = GhostTextBuffer::new();
        let end = state.doc().end();
        ghost.start(&state, end).unwrap();
        ghost.push(&mut state, " partial").unwrap();

        assert!(ghost.cancel(&mut state).unwrap());
        assert_eq!(state.doc().plain_text(), "Body");
        assert!(!state.can_undo());
        assert!(!ghost.cancel(&mut state).unwrap());
    }

    #[test]
    fn operations_without_span_fail() {
        let mut state = EditorState::default();
        let mut ghost = GhostTextBuffer::new();
        assert!(matches!(
            ghost.push(&mut state, "x"),
            Err(EditorError::NoGhostSpan)
        ));
        assert!(matches!(
            ghost.finish(&mut state, false),
            Err(EditorError::NoGhostSpan)
        ));
        ghost.start(&state, Position::default()).unwrap();
        assert!(matches!(
            ghost.start(&state, Position::default()),
            Err(EditorError::GhostSpanOpen)
        ));
    }
}
