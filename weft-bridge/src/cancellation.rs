//! Cooperative cancellation of in-flight native work, keyed by caller ids.
//!
//! At most one entry exists per key. Registering a key that is still live
//! cancels the former entry before the new one is installed. Each entry
//! carries a generation so a finishing task only removes its own entry.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use weft_queue::{ExecutionQueue, QueueError};

/// Returned by [`CancelToken::checkpoint`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Shared cancellation flag polled by a running task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancelled, for `?` at cooperative checkpoints.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// How a registered task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }
}

/// Handle to one registration, needed to complete it.
#[derive(Debug, Clone)]
pub struct Registration<K> {
    key: K,
    generation: u64,
    token: CancelToken,
}

impl<K> Registration<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancelToken,
}

/// Maps keys to the cancellation token of their in-flight task.
#[derive(Debug)]
pub struct CancellationRegistry<K> {
    entries: Mutex<HashMap<K, Entry>>,
    next_generation: AtomicU64,
}

impl<K> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }
}

impl<K> CancellationRegistry<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh entry for `key`, cancelling any live former entry first.
    pub fn register(&self, key: K) -> Registration<K> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        let mut entries = self.lock();
        if let Some(former) = entries.get(&key) {
            tracing::debug!(?key, former = former.generation, "replacing live registration");
            former.token.cancel();
        }
        entries.insert(
            key.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        Registration {
            key,
            generation,
            token,
        }
    }

    /// Signal the live entry for `key`. Returns `false` when there is none,
    /// which includes entries that already completed.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(entry) => {
                tracing::debug!(?key, "cancelling");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry created by `registration`, if it is still the live
    /// one for its key. A replaced or cancelled entry is left alone.
    pub fn complete(&self, registration: &Registration<K>) -> bool {
        let mut entries = self.lock();
        match entries.get(&registration.key) {
            Some(entry) if entry.generation == registration.generation => {
                entries.remove(&registration.key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel and remove every entry.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (key, entry) in drained {
            tracing::debug!(?key, "cancelling on shutdown");
            entry.token.cancel();
        }
    }

    /// Register `key`, run `task` on `queue` with the entry's token, and hand
    /// the outcome to `on_done` on the same queue.
    ///
    /// A task cancelled before it starts is never run. A task that fails with
    /// [`Cancelled`] (or any error once its token is cancelled) finishes as
    /// [`Outcome::Cancelled`]; other failures reach `on_done` as `Err`.
    pub fn run<T, F, D>(
        self: &Arc<Self>,
        key: K,
        queue: &ExecutionQueue,
        task: F,
        on_done: D,
    ) -> Result<CancelToken, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
        D: FnOnce(anyhow::Result<Outcome<T>>) + Send + 'static,
    {
        let registration = self.register(key);
        let token = registration.token.clone();
        let registry = self.clone();

        let scheduled = queue.enqueue(move || {
            let token = registration.token();
            let outcome = if token.is_cancelled() {
                Ok(Outcome::Cancelled)
            } else {
                match task(token) {
                    Ok(value) => Ok(Outcome::Completed(value)),
                    Err(err) if err.is::<Cancelled>() || token.is_cancelled() => {
                        Ok(Outcome::Cancelled)
                    }
                    Err(err) => Err(err),
                }
            };
            registry.complete(&registration);
            on_done(outcome);
        });

        if let Err(err) = scheduled {
            // The task never ran; nothing else will remove the entry.
            self.cancel_generation(&token);
            return Err(err);
        }
        Ok(token)
    }

    fn cancel_generation(&self, token: &CancelToken) {
        self.lock()
            .retain(|_, entry| !Arc::ptr_eq(&entry.token.flag, &token.flag));
        token.cancel();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use weft_queue::ErrorHandler;

    fn queue(name: &str) -> ExecutionQueue {
        let handler: ErrorHandler = Arc::new(|_: &str, _: &anyhow::Error| {});
        ExecutionQueue::spawn(name, handler).unwrap()
    }

    #[test]
    fn test_second_registration_cancels_first() {
        let registry = CancellationRegistry::new();
        let first = registry.register("download-1".to_string());
        assert!(!first.token().is_cancelled());

        let second = registry.register("download-1".to_string());
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert_eq!(registry.len(), 1);

        // The replaced entry's completion must not remove the live one.
        assert!(!registry.complete(&first));
        assert!(registry.contains(&"download-1".to_string()));
        assert!(registry.complete(&second));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let registry = CancellationRegistry::new();
        let registration = registry.register(7u32);
        assert!(registry.complete(&registration));
        assert!(!registry.cancel(&7));
        assert!(!registration.token().is_cancelled());
    }

    #[test]
    fn test_cancel_then_complete_does_not_resurrect() {
        let registry = CancellationRegistry::new();
        let registration = registry.register(1u32);
        assert!(registry.cancel(&1));
        assert!(registration.token().is_cancelled());
        assert!(!registry.complete(&registration));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_checkpoint() {
        let token = CancelToken::new();
        assert_eq!(token.checkpoint(), Ok(()));
        token.cancel();
        assert_eq!(token.checkpoint(), Err(Cancelled));
    }

    #[test]
    fn test_run_replaced_task_observes_cancellation_first() {
        let registry = Arc::new(CancellationRegistry::new());
        let worker = queue("downloads");
        let (started_tx, started_rx) = crossbeam_channel::bounded(0);
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let first_events = events_tx.clone();
        registry
            .run(
                "download-1".to_string(),
                &worker,
                move |token| {
                    started_tx.send(()).unwrap();
                    while !token.is_cancelled() {
                        std::thread::yield_now();
                    }
                    first_events.send("first observed cancel").unwrap();
                    token.checkpoint()?;
                    Ok(())
                },
                {
                    let events_tx = events_tx.clone();
                    move |outcome| {
                        assert!(outcome.unwrap().is_cancelled());
                        events_tx.send("first done").unwrap();
                    }
                },
            )
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second_events = events_tx.clone();
        registry
            .run(
                "download-1".to_string(),
                &worker,
                move |_| {
                    second_events.send("second began").unwrap();
                    Ok(5)
                },
                move |outcome| {
                    assert_eq!(outcome.unwrap(), Outcome::Completed(5));
                    events_tx.send("second done").unwrap();
                },
            )
            .unwrap();

        let seen: Vec<_> = (0..4)
            .map(|_| events_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(
            seen,
            vec!["first observed cancel", "first done", "second began", "second done"]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_run_cancelled_before_start_never_runs() {
        let registry = Arc::new(CancellationRegistry::new());
        let worker = queue("blocked");
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        worker.enqueue(move || gate_rx.recv().unwrap()).unwrap();
        registry
            .run(
                1u32,
                &worker,
                |_| -> anyhow::Result<()> { panic!("must not run") },
                move |outcome| done_tx.send(outcome.unwrap()).unwrap(),
            )
            .unwrap();
        assert!(registry.cancel(&1));
        gate_tx.send(()).unwrap();

        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::Cancelled
        );
    }
}
