//! Cooperative cancellation
//!
//! Every scheduled task gets its own handle and token. Cancelling by set id
//! resolves to all tasks carrying that set id, so two games of the same set
//! running side by side are both stopped.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Process-unique handle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared flag checked by a running task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `false` if it was already raised.
    pub fn cancel(&self) -> bool {
        let first = !self.state.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.state.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
struct Entry {
    set_id: Option<u64>,
    token: CancelToken,
}

/// Registry of cancellable tasks, keyed by task handle.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, Entry>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Entry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a handle and token for a task.
    pub fn register(&self, set_id: Option<u64>) -> (TaskId, CancelToken) {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let token = CancelToken::new();
        self.tasks().insert(
            id,
            Entry {
                set_id,
                token: token.clone(),
            },
        );
        (id, token)
    }

    /// Forget a finished task.
    pub fn unregister(&self, id: TaskId) {
        self.tasks().remove(&id);
    }

    /// Cancel one task by handle.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.tasks()
            .get(&id)
            .is_some_and(|entry| entry.token.cancel())
    }

    /// Cancel every registered task with this set id. Returns whether any
    /// such task was found.
    pub fn cancel_set(&self, set_id: u64) -> bool {
        let tasks = self.tasks();
        let mut found = false;
        for (id, entry) in tasks.iter() {
            if entry.set_id == Some(set_id) {
                entry.token.cancel();
                tracing::info!("Cancelling task {id} (set {set_id})");
                found = true;
            }
        }
        found
    }

    /// Cancel everything registered. Returns how many tasks were signalled.
    pub fn cancel_all(&self) -> usize {
        let tasks = self.tasks();
        tasks.values().filter(|entry| entry.token.cancel()).count()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_handles_are_unique() {
        let registry = CancelRegistry::new();
        let (a, _) = registry.register(Some(1));
        let (b, _) = registry.register(Some(1));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cancel_set_hits_every_task_of_the_set() {
        let registry = CancelRegistry::new();
        let (_, game_one) = registry.register(Some(7));
        let (_, game_two) = registry.register(Some(7));
        let (_, other) = registry.register(Some(8));

        assert!(registry.cancel_set(7));
        assert!(game_one.is_cancelled());
        assert!(game_two.is_cancelled());
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_set_reports_not_found() {
        let registry = CancelRegistry::new();
        registry.register(None);
        assert!(!registry.cancel_set(99));
    }

    #[test]
    fn test_unregistered_task_is_not_found() {
        let registry = CancelRegistry::new();
        let (id, token) = registry.register(Some(3));
        registry.unregister(id);
        assert!(!registry.cancel_set(3));
        assert!(!registry.cancel_task(id));
        assert!(!token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all_counts_fresh_cancellations() {
        let registry = CancelRegistry::new();
        let (first, _) = registry.register(Some(1));
        registry.register(None);
        assert!(registry.cancel_task(first));
        assert_eq!(registry.cancel_all(), 1);
        assert_eq!(registry.cancel_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_future_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_future_ready_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
