//! Cancellable delayed tasks keyed by purpose
//!
//! Scheduling a task under a key aborts whatever was pending under the same
//! key, so at most one instance of each purpose is ever waiting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Purpose of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Retry the head of the pending playback queue
    PendingRetry,
    /// Start a new recording after a reply finished playing
    ShadowRestart,
}

type Registry = HashMap<TaskKey, (u64, JoinHandle<()>)>;

/// Keyed registry of delayed tokio tasks
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<Registry>>,
    generation: Arc<AtomicU64>,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any task pending under `key`
    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::clone(&self.tasks);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut tasks = self.lock();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deregister before running so the task can reschedule its own key.
            // A newer generation under the key means this one was superseded.
            {
                let mut tasks = registry
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match tasks.get(&key) {
                    Some((current, _)) if *current == generation => {
                        tasks.remove(&key);
                    }
                    _ => return,
                }
            }
            task.await;
        });

        if let Some((_, previous)) = tasks.insert(key, (generation, handle)) {
            previous.abort();
            tracing::trace!(?key, "replaced pending task");
        }
    }

    /// Abort the task pending under `key`, if any
    pub fn cancel(&self, key: TaskKey) {
        if let Some((_, handle)) = self.lock().remove(&key) {
            handle.abort();
            tracing::trace!(?key, "cancelled task");
        }
    }

    /// Abort every pending task
    pub fn cancel_all(&self) {
        for (_, (_, handle)) in self.lock().drain() {
            handle.abort();
        }
    }

    /// Whether a task is waiting under `key`
    #[must_use]
    pub fn is_scheduled(&self, key: TaskKey) -> bool {
        self.lock().get(&key).is_some_and(|(_, h)| !h.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn runs_after_delay() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        scheduler.schedule(TaskKey::PendingRetry, Duration::from_millis(500), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled(TaskKey::PendingRetry));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(TaskKey::PendingRetry));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_cancels_previous() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let h = Arc::clone(&hits);
            scheduler.schedule(TaskKey::ShadowRestart, Duration::from_millis(900), async move {
                h.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&hits);
        scheduler.schedule(TaskKey::ShadowRestart, Duration::from_millis(10), async move {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&hits);
        scheduler.schedule(TaskKey::PendingRetry, Duration::from_millis(10), async move {
            b.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_everything() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        scheduler.schedule(TaskKey::PendingRetry, Duration::from_millis(10), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel_all();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
