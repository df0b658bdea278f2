//! Document draft store.
//!
//! Keyed store of in-progress streaming document buffers. Each document id
//! owns its own `watch` channel, so concurrent streams for different ids
//! never interfere and observers subscribe to exactly one document.
//!
//! A draft exists only while generation is active; once finished it is
//! promoted into a persisted version through [`promote_draft`] and
//! discarded.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard};

use shared_types::{Document, DocumentKind, Rect, SaveDocumentRequest};
use tokio::sync::{broadcast, watch};

use crate::persistence::{Persistence, PersistenceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub streaming: bool,
}

impl Draft {
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}

type DraftSlot = Arc<watch::Sender<Option<Draft>>>;

#[derive(Clone)]
pub struct DraftStore {
    slots: Arc<Mutex<HashMap<String, DraftSlot>>>,
    started: broadcast::Sender<String>,
}

impl Default for DraftStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftStore {
    pub fn new() -> Self {
        let (started, _) = broadcast::channel(64);
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            started,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, DraftSlot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, id: &str) -> DraftSlot {
        self.slots()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(watch::channel(None).0))
            .clone()
    }

    fn existing_slot(&self, id: &str) -> Option<DraftSlot> {
        self.slots().get(id).cloned()
    }

    /// Create or overwrite the draft for `id` with empty content.
    pub fn set_empty_draft(&self, id: &str, title: impl Into<String>, kind: DocumentKind) {
        let draft = Draft {
            id: id.to_string(),
            title: title.into(),
            kind,
            content: String::new(),
            streaming: true,
        };
        tracing::debug!(document_id = %id, title = %draft.title, "Draft started");
        self.slot(id).send_replace(Some(draft));
        let _ = self.started.send(id.to_string());
    }

    /// Restart the draft for an existing document that is being regenerated.
    /// Keeps the title and kind of a draft that is still around.
    pub fn begin_update(&self, id: &str) {
        let slot = self.slot(id);
        slot.send_modify(|current| {
            let (title, kind) = current
                .as_ref()
                .map(|draft| (draft.title.clone(), draft.kind))
                .unwrap_or_default();
            *current = Some(Draft {
                id: id.to_string(),
                title,
                kind,
                content: String::new(),
                streaming: true,
            });
        });
        tracing::debug!(document_id = %id, "Draft restarted for update");
        let _ = self.started.send(id.to_string());
    }

    /// Concatenate `delta` onto the draft. No-op (returns `None`) when no
    /// draft exists for `id`.
    pub fn append_draft_delta(&self, id: &str, delta: &str) -> Option<Draft> {
        let slot = self.existing_slot(id)?;
        let mut updated = None;
        slot.send_if_modified(|current| match current.as_mut() {
            Some(draft) => {
                draft.content.push_str(delta);
                updated = Some(draft.clone());
                true
            }
            None => false,
        });
        updated
    }

    /// Mark the draft as no longer streaming. The content stays until it is
    /// promoted.
    pub fn finish_draft(&self, id: &str) -> Option<Draft> {
        let slot = self.existing_slot(id)?;
        let mut finished = None;
        slot.send_if_modified(|current| match current.as_mut() {
            Some(draft) => {
                draft.streaming = false;
                finished = Some(draft.clone());
                true
            }
            None => false,
        });
        if let Some(draft) = &finished {
            tracing::debug!(document_id = %id, len = draft.content_len(), "Draft finished");
        }
        finished
    }

    /// Drop the draft; subscribers observe `None`. The slot itself goes
    /// once nobody is subscribed to it.
    pub fn discard(&self, id: &str) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(id) {
            slot.send_if_modified(|current| current.take().is_some());
            if slot.receiver_count() == 0 {
                slots.remove(id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Draft> {
        let slot = self.existing_slot(id)?;
        let draft = slot.borrow().clone();
        draft
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.get(id).is_some_and(|draft| draft.streaming)
    }

    pub fn subscribe(&self, id: &str) -> watch::Receiver<Option<Draft>> {
        self.prune_idle();
        self.slot(id).subscribe()
    }

    /// Ids of drafts as they are created or restarted, store-wide.
    pub fn subscribe_started(&self) -> broadcast::Receiver<String> {
        self.started.subscribe()
    }

    /// Forget empty slots that no one observes any more.
    fn prune_idle(&self) {
        self.slots()
            .retain(|_, slot| slot.borrow().is_some() || slot.receiver_count() > 0);
    }

    /// Ids of documents that currently have a draft.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.borrow().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Save a finished draft as the document's new latest version and discard
/// it. Streaming or missing drafts are left alone (`Ok(None)`); a failed
/// save keeps the draft so its content is never lost.
pub async fn promote_draft(
    persistence: &dyn Persistence,
    drafts: &DraftStore,
    id: &str,
) -> Result<Option<Document>, PersistenceError> {
    let Some(draft) = drafts.get(id) else {
        return Ok(None);
    };
    if draft.streaming {
        return Ok(None);
    }

    let request = SaveDocumentRequest {
        content: draft.content.clone(),
        title: draft.title.clone(),
        kind: draft.kind,
    };
    match persistence.save_document(id, request).await {
        Ok(document) => {
            tracing::info!(
                document_id = %id,
                version = document.version_number,
                "Draft promoted to new version"
            );
            drafts.discard(id);
            Ok(Some(document))
        }
        Err(e) => {
            tracing::warn!(document_id = %id, error = %e, "Draft promotion failed; keeping draft");
            Err(e)
        }
    }
}

// ============================================================================
// Auto-open heuristics
// ============================================================================

/// When a streaming draft should pop the artifact overlay open.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoOpenPolicy {
    /// Entering this length band for the first time opens the overlay.
    pub open_band: RangeInclusive<usize>,
    /// Drafts finishing at or below this length open the overlay centered.
    pub short_max: usize,
    pub viewport: Rect,
}

impl Default for AutoOpenPolicy {
    fn default() -> Self {
        Self {
            open_band: 400..=450,
            short_max: 200,
            viewport: Rect::new(0.0, 0.0, 1280.0, 800.0),
        }
    }
}

impl AutoOpenPolicy {
    /// Panel covers 60% of the viewport, centered.
    pub fn centered_anchor(&self) -> Rect {
        self.viewport
            .centered(self.viewport.width * 0.6, self.viewport.height * 0.6)
    }
}

/// Per-draft "band already crossed" bookkeeping for [`AutoOpenPolicy`].
#[derive(Debug, Default)]
pub struct AutoOpenTracker {
    policy: AutoOpenPolicy,
    crossed: HashSet<String>,
}

impl AutoOpenTracker {
    pub fn new(policy: AutoOpenPolicy) -> Self {
        Self {
            policy,
            crossed: HashSet::new(),
        }
    }

    pub fn policy(&self) -> &AutoOpenPolicy {
        &self.policy
    }

    /// `true` exactly once per draft: the first time its length lands in
    /// the open band.
    pub fn on_delta(&mut self, draft: &Draft) -> bool {
        if !self.policy.open_band.contains(&draft.content_len()) {
            return false;
        }
        self.crossed.insert(draft.id.clone())
    }

    /// Centered anchor when a finished draft is short enough to open.
    pub fn on_finish(&mut self, draft: &Draft) -> Option<Rect> {
        self.crossed.remove(&draft.id);
        (draft.content_len() <= self.policy.short_max).then(|| self.policy.centered_anchor())
    }

    /// Forget band state for a restarted draft.
    pub fn reset(&mut self, id: &str) {
        self.crossed.remove(id);
    }
}
