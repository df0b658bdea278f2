//! Artifact overlay store: the single floating panel showing a document.

use std::sync::Arc;

use shared_types::{ArtifactId, ArtifactOverlay, Rect};
use tokio::sync::watch;

/// At most one overlay is visible at any time; opening replaces, never stacks.
#[derive(Clone)]
pub struct OverlayStore {
    visible: Arc<watch::Sender<Option<ArtifactOverlay>>>,
}

impl Default for OverlayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayStore {
    pub fn new() -> Self {
        let (visible, _) = watch::channel(None);
        Self {
            visible: Arc::new(visible),
        }
    }

    pub fn open_artifact(&self, artifact_id: ArtifactId, anchor: Rect, title: impl Into<String>) {
        let next = ArtifactOverlay {
            artifact_id,
            anchor,
            title: title.into(),
            visible: true,
        };
        let replaced = self.visible.send_if_modified(|current| {
            if current.as_ref() == Some(&next) {
                return false;
            }
            *current = Some(next.clone());
            true
        });
        if replaced {
            tracing::debug!(artifact_id = %next.artifact_id.as_str(), "Opened artifact overlay");
        }
    }

    pub fn close_artifact(&self) {
        let closed = self.visible.send_if_modified(|current| current.take().is_some());
        if closed {
            tracing::debug!("Closed artifact overlay");
        }
    }

    pub fn visible_artifact(&self) -> Option<ArtifactOverlay> {
        self.visible.borrow().clone()
    }

    pub fn is_showing(&self, artifact_id: &ArtifactId) -> bool {
        self.visible
            .borrow()
            .as_ref()
            .is_some_and(|overlay| &overlay.artifact_id == artifact_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ArtifactOverlay>> {
        self.visible.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::DocumentKind;

    fn rect() -> Rect {
        Rect::new(10.0, 20.0, 300.0, 200.0)
    }

    #[test]
    fn opening_b_replaces_a_and_close_clears() {
        let store = OverlayStore::new();
        let a = ArtifactId::new(DocumentKind::Text, "a");
        let b = ArtifactId::new(DocumentKind::Text, "b");

        store.open_artifact(a.clone(), rect(), "A");
        store.open_artifact(b.clone(), rect(), "B");

        let visible = store.visible_artifact().unwrap();
        assert_eq!(visible.artifact_id, b);
        assert!(visible.visible);
        assert!(!store.is_showing(&a));

        store.close_artifact();
        assert_eq!(store.visible_artifact(), None);
    }

    #[test]
    fn opening_twice_with_same_arguments_is_idempotent() {
        let store = OverlayStore::new();
        let id = ArtifactId::new(DocumentKind::Code, "x");
        let mut rx = store.subscribe();

        store.open_artifact(id.clone(), rect(), "X");
        let once = store.visible_artifact();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.open_artifact(id, rect(), "X");
        assert_eq!(store.visible_artifact(), once);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn closing_when_nothing_is_open_does_not_notify() {
        let store = OverlayStore::new();
        let rx = store.subscribe();
        store.close_artifact();
        assert!(!rx.has_changed().unwrap());
    }
}
