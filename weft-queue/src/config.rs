//! The four standard queues, wired together at startup and disposed as a unit.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{DisposalPolicy, ErrorHandler, ExecutionQueue, QueueError};

/// Upper bound on waiting for the queues to go idle before closing them.
const QUIESCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Names of the standard queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Ui,
    Layout,
    NativeModules,
    Script,
}

impl QueueKind {
    pub const ALL: [QueueKind; 4] = [
        QueueKind::Ui,
        QueueKind::Layout,
        QueueKind::NativeModules,
        QueueKind::Script,
    ];

    /// Pipeline order: every queue is closed before the queues it feeds.
    /// Under [`DisposalPolicy::Drain`] the pipeline is quiesced first, since
    /// native modules also feed the script queue.
    pub const DISPOSAL_ORDER: [QueueKind; 4] = [
        QueueKind::Script,
        QueueKind::NativeModules,
        QueueKind::Layout,
        QueueKind::Ui,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QueueKind::Ui => "ui",
            QueueKind::Layout => "layout",
            QueueKind::NativeModules => "native_modules",
            QueueKind::Script => "script",
        }
    }

    fn index(self) -> usize {
        match self {
            QueueKind::Ui => 0,
            QueueKind::Layout => 1,
            QueueKind::NativeModules => 2,
            QueueKind::Script => 3,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a queue's execution context comes from.
#[derive(Debug, Clone, Default)]
pub enum QueueSource {
    /// Create a dedicated thread, owned and disposed by the configuration.
    #[default]
    Owned,
    /// Use a queue owned by someone else. It is never disposed here.
    Adopt(ExecutionQueue),
}

/// Per-kind sources plus the disposal policy for owned queues.
#[derive(Debug, Clone, Default)]
pub struct QueueConfigurationSpec {
    sources: [QueueSource; 4],
    disposal: DisposalPolicy,
}

impl QueueConfigurationSpec {
    /// Every queue owned, drained on disposal.
    pub fn owned() -> Self {
        Self::default()
    }

    pub fn adopt(mut self, kind: QueueKind, queue: ExecutionQueue) -> Self {
        self.sources[kind.index()] = QueueSource::Adopt(queue);
        self
    }

    pub fn with_disposal(mut self, policy: DisposalPolicy) -> Self {
        self.disposal = policy;
        self
    }

    pub fn source(&self, kind: QueueKind) -> &QueueSource {
        &self.sources[kind.index()]
    }

    pub fn disposal(&self) -> DisposalPolicy {
        self.disposal
    }
}

struct Slot {
    queue: ExecutionQueue,
    owned: bool,
}

/// Owns (or adopts) exactly one queue of each [`QueueKind`].
pub struct QueueConfiguration {
    slots: Vec<Slot>,
    disposal: DisposalPolicy,
    disposed: AtomicBool,
}

impl QueueConfiguration {
    pub fn new(spec: QueueConfigurationSpec, on_error: ErrorHandler) -> Result<Self, QueueError> {
        let QueueConfigurationSpec { sources, disposal } = spec;
        let mut slots = Vec::with_capacity(QueueKind::ALL.len());
        for (kind, source) in QueueKind::ALL.into_iter().zip(sources) {
            let slot = match source {
                QueueSource::Owned => Slot {
                    queue: ExecutionQueue::spawn(kind.name(), on_error.clone())?,
                    owned: true,
                },
                QueueSource::Adopt(queue) => {
                    tracing::debug!(queue = %kind, adopted = %queue.name(), "adopting external queue");
                    Slot {
                        queue,
                        owned: false,
                    }
                }
            };
            slots.push(slot);
        }
        Ok(Self {
            slots,
            disposal,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn queue(&self, kind: QueueKind) -> &ExecutionQueue {
        &self.slots[kind.index()].queue
    }

    pub fn ui(&self) -> &ExecutionQueue {
        self.queue(QueueKind::Ui)
    }

    pub fn layout(&self) -> &ExecutionQueue {
        self.queue(QueueKind::Layout)
    }

    pub fn native_modules(&self) -> &ExecutionQueue {
        self.queue(QueueKind::NativeModules)
    }

    pub fn script(&self) -> &ExecutionQueue {
        self.queue(QueueKind::Script)
    }

    pub fn is_owned(&self, kind: QueueKind) -> bool {
        self.slots[kind.index()].owned
    }

    pub fn disposal(&self) -> DisposalPolicy {
        self.disposal
    }

    /// True once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Dispose every owned queue in pipeline order. Adopted queues are left
    /// running. Calling again is a no-op.
    ///
    /// When draining, waits until no owned queue has work queued or running,
    /// so a task that hands work to another queue mid-disposal is not lost.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.disposal == DisposalPolicy::Drain {
            self.quiesce();
        }
        for kind in QueueKind::DISPOSAL_ORDER {
            let slot = &self.slots[kind.index()];
            if slot.owned {
                slot.queue.dispose_with(self.disposal);
            }
        }
        tracing::debug!(policy = ?self.disposal, "queue configuration disposed");
    }

    /// Wait until every owned queue is idle and no task was accepted while
    /// checking. Work flows script, native modules, layout, ui and back to
    /// script, so one pass in pipeline order is not enough.
    fn quiesce(&self) {
        let owned: Vec<&ExecutionQueue> = self
            .slots
            .iter()
            .filter(|slot| slot.owned)
            .map(|slot| &slot.queue)
            .collect();
        if owned.iter().any(|queue| queue.is_on_queue()) {
            tracing::debug!("disposing from a pipeline queue, skipping quiescence");
            return;
        }

        let deadline = Instant::now() + QUIESCE_TIMEOUT;
        loop {
            let before: u64 = owned.iter().map(|queue| queue.accepted()).sum();
            let idle = owned.iter().all(|queue| queue.is_idle());
            let after: u64 = owned.iter().map(|queue| queue.accepted()).sum();
            if idle && before == after {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = QUIESCE_TIMEOUT.as_millis() as u64,
                    "queues still busy at disposal, closing anyway"
                );
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for QueueConfiguration {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn silent() -> ErrorHandler {
        Arc::new(|_: &str, _: &anyhow::Error| {})
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::yield_now();
        }
    }

    /// Block the UI queue, queue two tasks behind the gate, dispose the
    /// configuration from another thread, then release the gate.
    fn dispose_with_two_pending(policy: DisposalPolicy) -> Vec<u32> {
        let config = Arc::new(
            QueueConfiguration::new(QueueConfigurationSpec::owned().with_disposal(policy), silent())
                .unwrap(),
        );
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (log_tx, log_rx) = crossbeam_channel::unbounded();

        config.ui().enqueue(move || gate_rx.recv().unwrap()).unwrap();
        for i in 1..=2 {
            let log_tx = log_tx.clone();
            config.ui().enqueue(move || log_tx.send(i).unwrap()).unwrap();
        }

        let disposer = {
            let config = config.clone();
            thread::spawn(move || config.dispose())
        };
        // Draining waits for the gated task, discarding closes right away.
        match policy {
            DisposalPolicy::Drain => wait_until(|| config.is_disposed()),
            DisposalPolicy::Discard => wait_until(|| config.ui().is_disposed()),
        }
        gate_tx.send(()).unwrap();
        disposer.join().unwrap();

        for kind in QueueKind::ALL {
            assert!(config.queue(kind).is_disposed(), "{kind} still open");
        }
        log_rx.try_iter().collect()
    }

    #[test]
    fn test_drain_completes_pending_ui_tasks() {
        assert_eq!(dispose_with_two_pending(DisposalPolicy::Drain), vec![1, 2]);
    }

    #[test]
    fn test_discard_drops_pending_ui_tasks() {
        assert!(dispose_with_two_pending(DisposalPolicy::Discard).is_empty());
    }

    #[test]
    fn test_drain_keeps_work_handed_back_upstream() {
        let config = Arc::new(QueueConfiguration::new(QueueConfigurationSpec::owned(), silent()).unwrap());
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (log_tx, log_rx) = crossbeam_channel::unbounded();

        // A native module finishes after disposal starts and calls back into
        // script, which in turn schedules layout work.
        let script = config.script().clone();
        let layout = config.layout().clone();
        config
            .native_modules()
            .enqueue(move || {
                gate_rx.recv().unwrap();
                let script_log = log_tx.clone();
                let handed_back = script.enqueue(move || {
                    script_log.send("script").unwrap();
                    let layout_log = script_log.clone();
                    let scheduled = layout.enqueue(move || layout_log.send("layout").unwrap());
                    script_log.send(if scheduled.is_ok() { "scheduled" } else { "refused" }).unwrap();
                });
                log_tx.send(if handed_back.is_ok() { "handed back" } else { "refused" }).unwrap();
            })
            .unwrap();

        let disposer = {
            let config = config.clone();
            thread::spawn(move || config.dispose())
        };
        wait_until(|| config.is_disposed());
        gate_tx.send(()).unwrap();
        disposer.join().unwrap();

        let mut seen: Vec<&str> = log_rx.try_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["handed back", "layout", "scheduled", "script"]);
        for kind in QueueKind::ALL {
            assert!(config.queue(kind).is_disposed(), "{kind} still open");
        }
    }

    #[test]
    fn test_dispose_from_pipeline_queue_returns() {
        let config = Arc::new(QueueConfiguration::new(QueueConfigurationSpec::owned(), silent()).unwrap());
        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = config.clone();
        config
            .layout()
            .enqueue(move || {
                inner.dispose();
                tx.send(inner.script().is_disposed()).unwrap();
            })
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(config.is_disposed());
    }

    #[test]
    fn test_adopted_queue_left_untouched() {
        let (ui, pump) = ExecutionQueue::external("host-ui", silent());
        let config = QueueConfiguration::new(
            QueueConfigurationSpec::owned().adopt(QueueKind::Ui, ui.clone()),
            silent(),
        )
        .unwrap();
        assert!(!config.is_owned(QueueKind::Ui));
        assert!(config.is_owned(QueueKind::Script));
        assert_eq!(config.ui().name(), "host-ui");

        config.dispose();
        assert!(config.script().is_disposed());
        assert!(!ui.is_disposed());

        let (tx, rx) = crossbeam_channel::bounded(1);
        ui.enqueue(move || tx.send(()).unwrap()).unwrap();
        assert_eq!(pump.run_pending(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_queues_are_distinct_contexts() {
        let config = QueueConfiguration::new(QueueConfigurationSpec::owned(), silent()).unwrap();
        let layout = config.layout().clone();
        let on_layout = config
            .script()
            .enqueue_and_wait(move || layout.is_on_queue())
            .unwrap();
        assert!(!on_layout);
        assert_eq!(config.native_modules().name(), "native_modules");
    }
}
