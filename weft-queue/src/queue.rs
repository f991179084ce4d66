//! Execution queues: one FIFO mailbox drained by exactly one execution context.
//!
//! A queue is either backed by a dedicated thread it owns
//! ([`ExecutionQueue::spawn`]) or by an externally driven loop
//! ([`ExecutionQueue::external`]), such as a platform UI thread, which pumps
//! tasks through a [`LoopPump`].

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::QueueError;

type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Receives every task failure (returned error or panic) with the queue name.
pub type ErrorHandler = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// What happens to accepted-but-unexecuted tasks when a queue is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalPolicy {
    /// Run every task accepted before disposal, then stop.
    #[default]
    Drain,
    /// Drop pending tasks unexecuted. The in-flight task still completes.
    Discard,
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the queue whose context the current thread is executing.
    static CURRENT_QUEUE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Marks the current thread as running a queue's context until dropped.
struct ContextGuard {
    previous: Option<u64>,
}

impl ContextGuard {
    fn enter(id: u64) -> Self {
        let previous = CURRENT_QUEUE.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_QUEUE.with(|current| current.set(self.previous));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State needed by whichever context executes the tasks.
struct Runner {
    id: u64,
    name: String,
    discard: AtomicBool,
    pending: AtomicUsize,
    /// Total tasks ever accepted.
    accepted: AtomicU64,
    /// Set while a task taken off the mailbox is executing.
    busy: AtomicBool,
    on_error: ErrorHandler,
}

impl Runner {
    fn run(&self, task: Task) {
        // Raised before `pending` drops so an observer never sees neither.
        self.busy.store(true, Ordering::SeqCst);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.execute(task);
        self.busy.store(false, Ordering::SeqCst);
    }

    fn execute(&self, task: Task) {
        if self.discard.load(Ordering::Acquire) {
            tracing::trace!(queue = %self.name, "discarding task after disposal");
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => (self.on_error)(&self.name, &err),
            Err(payload) => {
                let err = anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref()));
                (self.on_error)(&self.name, &err);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct Shared {
    runner: Arc<Runner>,
    /// `None` once disposed. Held while sending so disposal cannot interleave.
    mailbox: Mutex<Option<Sender<Task>>>,
    /// Worker thread, for spawned queues only.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn shutdown(&self, policy: DisposalPolicy) {
        let Some(sender) = lock(&self.mailbox).take() else {
            return;
        };
        if policy == DisposalPolicy::Discard {
            self.runner.discard.store(true, Ordering::Release);
        }
        // Closing the mailbox lets the worker finish what is queued and exit.
        drop(sender);

        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!(queue = %self.runner.name, "queue disposed from its own thread");
                return;
            }
            if handle.join().is_err() {
                tracing::error!(queue = %self.runner.name, "queue thread panicked");
            }
        }
        tracing::debug!(queue = %self.runner.name, ?policy, "queue disposed");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown(DisposalPolicy::Drain);
    }
}

/// A FIFO task runner bound to exactly one execution context.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct ExecutionQueue {
    shared: Arc<Shared>,
}

impl ExecutionQueue {
    /// Create a queue backed by a new dedicated thread.
    pub fn spawn(name: impl Into<String>, on_error: ErrorHandler) -> Result<Self, QueueError> {
        let (runner, tx, rx) = Self::parts(name.into(), on_error);

        let worker_runner = runner.clone();
        let handle = thread::Builder::new()
            .name(format!("weft-{}", runner.name))
            .spawn(move || worker_loop(rx, worker_runner))
            .map_err(|source| QueueError::Spawn {
                queue: runner.name.clone(),
                source,
            })?;

        Ok(Self {
            shared: Arc::new(Shared {
                runner,
                mailbox: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Create a queue whose tasks are executed by an external loop.
    ///
    /// The returned [`LoopPump`] must be driven from the external context.
    pub fn external(name: impl Into<String>, on_error: ErrorHandler) -> (Self, LoopPump) {
        let (runner, tx, rx) = Self::parts(name.into(), on_error);
        let pump = LoopPump {
            rx,
            runner: runner.clone(),
        };
        let queue = Self {
            shared: Arc::new(Shared {
                runner,
                mailbox: Mutex::new(Some(tx)),
                worker: Mutex::new(None),
            }),
        };
        (queue, pump)
    }

    fn parts(name: String, on_error: ErrorHandler) -> (Arc<Runner>, Sender<Task>, Receiver<Task>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let runner = Arc::new(Runner {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            discard: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            on_error,
        });
        (runner, tx, rx)
    }

    pub fn name(&self) -> &str {
        &self.shared.runner.name
    }

    /// True when called from a task running on this queue.
    pub fn is_on_queue(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == Some(self.shared.runner.id))
    }

    /// Number of accepted tasks not yet started.
    pub fn pending(&self) -> usize {
        self.shared.runner.pending.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared.mailbox).is_none()
    }

    /// No task queued and none executing.
    pub(crate) fn is_idle(&self) -> bool {
        let runner = &self.shared.runner;
        runner.pending.load(Ordering::SeqCst) == 0 && !runner.busy.load(Ordering::SeqCst)
    }

    /// Tasks accepted over the queue's lifetime.
    pub(crate) fn accepted(&self) -> u64 {
        self.shared.runner.accepted.load(Ordering::SeqCst)
    }

    /// Append a task. Never blocks.
    pub fn enqueue<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(move || {
            task();
            Ok(())
        }))
    }

    /// Append a task whose error is routed to the queue's error handler.
    pub fn enqueue_fallible<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(Box::new(task))
    }

    /// Append a task and block until it has run, returning its result.
    ///
    /// Fails fast with [`QueueError::WouldDeadlock`] when called from this
    /// queue's own context.
    pub fn enqueue_and_wait<F, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_on_queue() {
            return Err(QueueError::WouldDeadlock {
                queue: self.name().to_string(),
            });
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.enqueue(move || {
            let _ = tx.send(task());
        })?;

        rx.recv().map_err(|_| QueueError::TaskFailed {
            queue: self.name().to_string(),
            reason: "task panicked or was discarded".to_string(),
        })
    }

    fn push(&self, task: Task) -> Result<(), QueueError> {
        let mailbox = lock(&self.shared.mailbox);
        let Some(tx) = mailbox.as_ref() else {
            return Err(QueueError::Disposed {
                queue: self.name().to_string(),
            });
        };
        let runner = &self.shared.runner;
        runner.accepted.fetch_add(1, Ordering::SeqCst);
        runner.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(task).is_err() {
            runner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Disposed {
                queue: self.name().to_string(),
            });
        }
        Ok(())
    }

    /// Dispose with [`DisposalPolicy::Drain`].
    pub fn dispose(&self) {
        self.dispose_with(DisposalPolicy::Drain);
    }

    /// Stop accepting tasks and release the execution context.
    ///
    /// Blocks until the worker thread has exited unless called from it.
    /// Calling again is a no-op.
    pub fn dispose_with(&self, policy: DisposalPolicy) {
        self.shared.shutdown(policy);
    }
}

impl fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("name", &self.name())
            .field("pending", &self.pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn worker_loop(rx: Receiver<Task>, runner: Arc<Runner>) {
    let _context = ContextGuard::enter(runner.id);
    tracing::debug!(queue = %runner.name, "queue thread started");
    for task in rx.iter() {
        runner.run(task);
    }
    tracing::debug!(queue = %runner.name, "queue thread stopped");
}

/// Drives an externally bound queue from the thread that owns its context.
pub struct LoopPump {
    rx: Receiver<Task>,
    runner: Arc<Runner>,
}

impl LoopPump {
    /// Run every task currently queued, including ones they enqueue.
    /// Returns the number of tasks taken off the queue.
    pub fn run_pending(&self) -> usize {
        let _context = ContextGuard::enter(self.runner.id);
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            self.runner.run(task);
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for work, then run everything queued.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return 0,
        };
        let _context = ContextGuard::enter(self.runner.id);
        self.runner.run(first);
        1 + self.run_pending()
    }

    /// Run tasks as they arrive until the queue is disposed and drained.
    pub fn run_until_disposed(&self) {
        let _context = ContextGuard::enter(self.runner.id);
        for task in self.rx.iter() {
            self.runner.run(task);
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.runner.name
    }
}
