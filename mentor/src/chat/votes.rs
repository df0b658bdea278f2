//! Optimistic vote bookkeeping.

use std::collections::HashMap;

use shared_types::Vote;

/// messageId -> upvoted. An absent entry is "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteMap {
    entries: HashMap<String, bool>,
}

impl VoteMap {
    pub fn from_votes(votes: &[Vote]) -> Self {
        Self {
            entries: votes
                .iter()
                .map(|vote| (vote.message_id.clone(), vote.is_upvoted))
                .collect(),
        }
    }

    pub fn get(&self, message_id: &str) -> Option<bool> {
        self.entries.get(message_id).copied()
    }

    /// Record a vote before the server acknowledges it. Returns the prior
    /// state for [`VoteMap::rollback`].
    pub fn apply_optimistic(&mut self, message_id: &str, is_upvoted: bool) -> Option<bool> {
        self.entries.insert(message_id.to_string(), is_upvoted)
    }

    pub fn rollback(&mut self, message_id: &str, previous: Option<bool>) {
        match previous {
            Some(is_upvoted) => {
                self.entries.insert(message_id.to_string(), is_upvoted);
            }
            None => {
                self.entries.remove(message_id);
            }
        }
    }

    pub fn as_map(&self) -> &HashMap<String, bool> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_restores_prior_state() {
        let mut votes = VoteMap::default();
        let previous = votes.apply_optimistic("m1", true);
        assert_eq!(previous, None);
        assert_eq!(votes.get("m1"), Some(true));
        votes.rollback("m1", previous);
        assert_eq!(votes.get("m1"), None);

        let mut votes = VoteMap::from_votes(&[Vote {
            message_id: "m2".to_string(),
            is_upvoted: false,
        }]);
        let previous = votes.apply_optimistic("m2", true);
        votes.rollback("m2", previous);
        assert_eq!(votes.get("m2"), Some(false));
    }
}
