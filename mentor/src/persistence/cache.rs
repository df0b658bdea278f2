//! Memoized thread detail and sidebar list with explicit invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use shared_types::{Thread, ThreadGroup};
use tokio::sync::watch;

use super::{Persistence, PersistenceError};

#[derive(Default)]
struct CacheEntries {
    threads: HashMap<String, Thread>,
    groups: Option<Vec<ThreadGroup>>,
}

/// Read-through cache over [`Persistence`].
///
/// Every invalidation bumps a generation counter published on a `watch`
/// channel, so views holding a receiver know to refetch. A fetch that races
/// an invalidation is returned to its caller but not cached.
#[derive(Clone)]
pub struct ThreadCache {
    persistence: Arc<dyn Persistence>,
    entries: Arc<Mutex<CacheEntries>>,
    generation: Arc<watch::Sender<u64>>,
}

impl ThreadCache {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            persistence,
            entries: Arc::new(Mutex::new(CacheEntries::default())),
            generation: Arc::new(generation),
        }
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn entries(&self) -> MutexGuard<'_, CacheEntries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn thread(&self, thread_id: &str) -> Result<Thread, PersistenceError> {
        if let Some(thread) = self.entries().threads.get(thread_id) {
            return Ok(thread.clone());
        }

        let started_at = self.generation();
        let thread = self.persistence.fetch_thread(thread_id).await?;
        if self.generation() == started_at {
            self.entries()
                .threads
                .insert(thread_id.to_string(), thread.clone());
        }
        Ok(thread)
    }

    pub async fn thread_groups(&self) -> Result<Vec<ThreadGroup>, PersistenceError> {
        if let Some(groups) = self.entries().groups.as_ref() {
            return Ok(groups.clone());
        }

        let started_at = self.generation();
        let groups = self.persistence.fetch_thread_groups().await?;
        if self.generation() == started_at {
            self.entries().groups = Some(groups.clone());
        }
        Ok(groups)
    }

    pub fn invalidate_thread(&self, thread_id: &str) {
        self.entries().threads.remove(thread_id);
        self.bump();
        tracing::debug!(thread_id = %thread_id, "Invalidated thread detail");
    }

    pub fn invalidate_thread_list(&self) {
        self.entries().groups = None;
        self.bump();
        tracing::debug!("Invalidated thread list");
    }

    fn bump(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPersistence;

    #[tokio::test]
    async fn thread_detail_is_fetched_once_until_invalidated() {
        let persistence = Arc::new(MemoryPersistence::default());
        persistence.insert_thread(Thread {
            id: "t1".to_string(),
            title: "First".to_string(),
            messages: Vec::new(),
            selected_leaf_id: None,
            votes: Vec::new(),
        });
        let cache = ThreadCache::new(persistence.clone());

        cache.thread("t1").await.unwrap();
        cache.thread("t1").await.unwrap();
        assert_eq!(persistence.thread_fetches(), 1);

        let mut generations = cache.subscribe();
        cache.invalidate_thread("t1");
        assert!(generations.has_changed().unwrap());
        assert_eq!(*generations.borrow_and_update(), 1);

        cache.thread("t1").await.unwrap();
        assert_eq!(persistence.thread_fetches(), 2);
    }

    #[tokio::test]
    async fn thread_list_invalidation_drops_groups() {
        let persistence = Arc::new(MemoryPersistence::default());
        let cache = ThreadCache::new(persistence.clone());

        assert!(cache.thread_groups().await.unwrap().is_empty());
        cache.thread_groups().await.unwrap();
        assert_eq!(persistence.group_fetches(), 1);

        cache.invalidate_thread_list();
        cache.thread_groups().await.unwrap();
        assert_eq!(persistence.group_fetches(), 2);
    }

    #[tokio::test]
    async fn missing_thread_is_not_found() {
        let cache = ThreadCache::new(Arc::new(MemoryPersistence::default()));
        assert!(matches!(
            cache.thread("nope").await,
            Err(PersistenceError::NotFound(_))
        ));
    }
}
