//! Transactions over a [`RichDocument`] and the undo/redo history.

use super::model::{Mark, Position, RichDocument};
use super::EditorError;

const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    InsertText {
        at: Position,
        text: String,
        marks: Vec<Mark>,
    },
    DeleteRange {
        from: Position,
        to: Position,
    },
    InsertFragment {
        at: Position,
        fragment: RichDocument,
    },
    ReplaceDocument(RichDocument),
}

impl Step {
    fn apply(&self, doc: &mut RichDocument) -> Result<(), EditorError> {
        match self {
            Step::InsertText { at, text, marks } => doc.insert_text(*at, text, marks),
            Step::DeleteRange { from, to } => doc.delete_range(*from, *to),
            Step::InsertFragment { at, fragment } => doc.insert_fragment(*at, fragment.clone()),
            Step::ReplaceDocument(replacement) => {
                *doc = replacement.clone();
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Ghost,
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionMeta {
    pub add_to_history: bool,
    /// The change mirrors persisted content and must not be saved back.
    pub suppress_save: bool,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub steps: Vec<Step>,
    pub meta: TransactionMeta,
}

impl Transaction {
    pub fn new(origin: Origin) -> Self {
        Self {
            steps: Vec::new(),
            meta: TransactionMeta {
                add_to_history: true,
                suppress_save: false,
                origin,
            },
        }
    }

    pub fn user() -> Self {
        Self::new(Origin::User)
    }

    /// Whole-document replacement that stays out of history and is never
    /// saved.
    pub fn reconcile(doc: RichDocument) -> Self {
        Self::new(Origin::Reconcile)
            .step(Step::ReplaceDocument(doc))
            .add_to_history(false)
            .suppress_save(true)
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn insert_text(self, at: Position, text: impl Into<String>) -> Self {
        self.step(Step::InsertText {
            at,
            text: text.into(),
            marks: Vec::new(),
        })
    }

    pub fn delete_range(self, from: Position, to: Position) -> Self {
        self.step(Step::DeleteRange { from, to })
    }

    pub fn add_to_history(mut self, add: bool) -> Self {
        self.meta.add_to_history = add;
        self
    }

    pub fn suppress_save(mut self, suppress: bool) -> Self {
        self.meta.suppress_save = suppress;
        self
    }
}

/// Outcome of a successfully applied transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub meta: TransactionMeta,
    pub changed: bool,
}

/// Document plus history. Undo entries are whole-document snapshots with
/// ghost spans stripped, so uncommitted text never comes back through undo.
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    doc: RichDocument,
    undo: Vec<RichDocument>,
    redo: Vec<RichDocument>,
}

impl EditorState {
    pub fn new(doc: RichDocument) -> Self {
        Self {
            doc,
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    pub fn doc(&self) -> &RichDocument {
        &self.doc
    }

    /// All steps apply or none do.
    pub fn apply(&mut self, transaction: &Transaction) -> Result<Applied, EditorError> {
        let mut next = self.doc.clone();
        for step in &transaction.steps {
            step.apply(&mut next)?;
        }

        let changed = next != self.doc;
        if changed && transaction.meta.add_to_history {
            self.undo.push(self.doc.without_ghost());
            if self.undo.len() > MAX_HISTORY {
                self.undo.remove(0);
            }
            self.redo.clear();
        }
        self.doc = next;
        Ok(Applied {
            meta: transaction.meta,
            changed,
        })
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.doc, previous);
        self.redo.push(current.without_ghost());
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.doc, next);
        self.undo.push(current.without_ghost());
        true
    }
}
