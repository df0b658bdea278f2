//! Cancellable delayed task: one pending timer, restarted on every schedule.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending {
    handle: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

/// At most one pending timer. `schedule` cancels a timer that has not fired
/// yet and starts a new one; work whose timer already fired runs to
/// completion and is never queued behind.
#[derive(Default)]
pub struct DebouncedTask {
    pending: Mutex<Option<Pending>>,
}

impl DebouncedTask {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schedule<F>(&self, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            cancel_unfired(previous);
        }

        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = fired.clone();
        // Nothing after the sleep yields, so an abort either lands before
        // `fired` is set or misses the work entirely.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fired_flag.store(true, Ordering::SeqCst);
            tokio::spawn(work);
        });
        *pending = Some(Pending { handle, fired });
    }

    /// Cancel the timer if it has not fired. Returns whether one was cancelled.
    pub fn cancel_pending(&self) -> bool {
        match self.pending().take() {
            Some(pending) => cancel_unfired(pending),
            None => false,
        }
    }

    /// A timer is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|p| !p.fired.load(Ordering::SeqCst) && !p.handle.is_finished())
    }
}

fn cancel_unfired(pending: Pending) -> bool {
    if pending.fired.load(Ordering::SeqCst) {
        return false;
    }
    pending.handle.abort();
    true
}

impl Drop for DebouncedTask {
    fn drop(&mut self) {
        if let Some(pending) = self.pending().take() {
            cancel_unfired(pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let task = DebouncedTask::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        task.schedule(Duration::from_secs(2), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_restarts_the_timer_without_queueing() {
        let task = DebouncedTask::new();
        let runs = Arc::new(Mutex::new(Vec::new()));

        for value in 1..=3 {
            let runs = runs.clone();
            task.schedule(Duration::from_secs(2), async move {
                runs.lock().unwrap().push(value);
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(*runs.lock().unwrap(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_drops_unfired_work() {
        let task = DebouncedTask::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        task.schedule(Duration::from_secs(2), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.cancel_pending());
        assert!(!task.cancel_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_work_survives_cancel_and_drop() {
        let task = DebouncedTask::new();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        task.schedule(Duration::from_secs(1), async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            d.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        settle().await;
        assert!(!task.is_pending());
        assert!(!task.cancel_pending());
        drop(task);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
