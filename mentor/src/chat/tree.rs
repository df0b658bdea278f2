//! Branching message history stored as an arena keyed by message id.

use std::collections::{HashMap, HashSet};

use shared_types::{Message, Thread};

#[derive(Debug, Clone)]
pub struct MessageTree {
    records: HashMap<String, Message>,
    /// Insertion order, used to pick a default leaf and to list children.
    order: Vec<String>,
    selected_leaf: Option<String>,
    max_depth: usize,
}

impl MessageTree {
    pub fn new(max_depth: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            selected_leaf: None,
            max_depth,
        }
    }

    /// Rebuild from persisted detail. A selected leaf that does not resolve
    /// falls back to the most recent message.
    pub fn from_thread(thread: &Thread, max_depth: usize) -> Self {
        let mut tree = Self::new(max_depth);
        for message in &thread.messages {
            tree.records.insert(message.id.clone(), message.clone());
            if !tree.order.contains(&message.id) {
                tree.order.push(message.id.clone());
            }
        }
        tree.selected_leaf = thread
            .selected_leaf_id
            .clone()
            .filter(|id| tree.records.contains_key(id))
            .or_else(|| tree.order.last().cloned());
        tree
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.records.get_mut(id)
    }

    pub fn leaf_id(&self) -> Option<&str> {
        self.selected_leaf.as_deref()
    }

    /// Add a message and make it the selected leaf.
    pub fn push(&mut self, message: Message) {
        let id = message.id.clone();
        if self.records.insert(id.clone(), message).is_none() {
            self.order.push(id.clone());
        }
        self.selected_leaf = Some(id);
    }

    /// Switch branch. Unknown ids are ignored.
    pub fn select_leaf(&mut self, id: &str) -> bool {
        if !self.records.contains_key(id) {
            return false;
        }
        self.selected_leaf = Some(id.to_string());
        true
    }

    /// Direct children of `parent` (`None` for roots) in insertion order.
    pub fn children(&self, parent: Option<&str>) -> Vec<&Message> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|message| message.parent_id.as_deref() == parent)
            .collect()
    }

    /// Root-to-leaf path through the selected leaf. A missing parent, a
    /// cycle, or a chain deeper than the guard truncates the path.
    pub fn active_path(&self) -> Vec<Message> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.selected_leaf.clone();

        while let Some(id) = cursor {
            if path.len() >= self.max_depth {
                tracing::warn!(depth = path.len(), "Message chain exceeds depth guard; truncating");
                break;
            }
            if !seen.insert(id.clone()) {
                tracing::warn!(message_id = %id, "Cycle in message parents; truncating");
                break;
            }
            let Some(message) = self.records.get(&id) else {
                tracing::warn!(message_id = %id, "Missing parent message; truncating");
                break;
            };
            path.push(message.clone());
            cursor = message.parent_id.clone();
        }

        path.reverse();
        path
    }
}
