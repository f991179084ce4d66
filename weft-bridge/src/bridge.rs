//! The message bridge between the script engine and native modules.
//!
//! A batch moves through `Idle -> Receiving -> Dispatching -> Flushing -> Idle`:
//!
//! 1. **Receiving** (script queue): the engine is called and returns a
//!    flushed queue, which is decoded.
//! 2. **Dispatching**: each descriptor is validated against the registry and
//!    scheduled on the native-modules queue in receipt order. Invalid
//!    descriptors are reported and skipped.
//! 3. **Flushing**: after the last call and the batch-complete hooks, the
//!    script-bound calls the handlers produced are released as one delivery
//!    on the script queue.

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use weft_api::{CallDescriptor, CallbackId, DecodedBatch, FlushedQueue, MethodId, ModuleId, ScriptCall};
use weft_queue::ExecutionQueue;

use crate::module::{Handler, check_args};
use crate::{
    BridgeError, CallContext, CallbackTracker, CancellationRegistry, ModuleRegistry, Promise,
    ScriptSink,
};

/// The script side, as the bridge needs it: synchronous call-in that hands
/// back whatever native calls the script queued meanwhile.
///
/// Only ever driven from the script queue.
pub trait ScriptEngine: Send {
    /// Receive the module configuration before the first call.
    fn initialize(&mut self, _module_config: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Call `module.method(args)` and return the flushed queue.
    fn call_function(&mut self, module: &str, method: &str, args: &[Value]) -> anyhow::Result<Value>;

    /// Invoke a script callback and return the flushed queue.
    fn invoke_callback(&mut self, callback_id: CallbackId, args: &[Value]) -> anyhow::Result<Value>;

    /// Return the flushed queue without calling anything.
    fn flush_queue(&mut self) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

/// Receives bridge diagnostics. Every method defaults to doing nothing.
pub trait BridgeListener: Send + Sync {
    fn batch_dispatched(&self, _batch_id: u64, _dispatched: usize, _rejected: usize) {}

    /// One descriptor of a batch was rejected before dispatch.
    fn call_rejected(&self, _batch_id: u64, _index: usize, _error: &BridgeError) {}

    /// A whole flushed queue (or the engine call producing it) failed.
    fn batch_failed(&self, _error: &BridgeError) {}

    fn handler_failed(&self, _module: &str, _method: &str, _error: &anyhow::Error) {}
}

pub struct NoopListener;

impl BridgeListener for NoopListener {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgePhase {
    Idle = 0,
    Receiving = 1,
    Dispatching = 2,
    Flushing = 3,
}

impl BridgePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BridgePhase::Receiving,
            2 => BridgePhase::Dispatching,
            3 => BridgePhase::Flushing,
            _ => BridgePhase::Idle,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct OutboxState {
    pending: Vec<ScriptCall>,
    holds: usize,
    flush_scheduled: bool,
}

/// Collects script-bound calls and delivers them in as few script-queue
/// tasks as possible.
struct Outbox {
    state: Mutex<OutboxState>,
    script: ExecutionQueue,
    core: Weak<Core>,
}

impl Outbox {
    fn hold(&self) {
        lock(&self.state).holds += 1;
    }

    fn release(&self) {
        let schedule = {
            let mut state = lock(&self.state);
            state.holds = state.holds.saturating_sub(1);
            state.claim_flush()
        };
        if schedule {
            self.schedule_flush();
        }
    }

    fn take(&self) -> Vec<ScriptCall> {
        let mut state = lock(&self.state);
        state.flush_scheduled = false;
        std::mem::take(&mut state.pending)
    }

    fn schedule_flush(&self) {
        let core = self.core.clone();
        let scheduled = self.script.enqueue(move || {
            if let Some(core) = core.upgrade() {
                core.flush_outbox();
            }
        });
        if let Err(err) = scheduled {
            tracing::warn!(error = %err, "dropping script-bound calls");
            let dropped = self.take();
            tracing::debug!(count = dropped.len(), "outbox discarded");
        }
    }
}

impl OutboxState {
    /// Whether the caller should schedule a flush now.
    fn claim_flush(&mut self) -> bool {
        if self.holds > 0 || self.flush_scheduled || self.pending.is_empty() {
            return false;
        }
        self.flush_scheduled = true;
        true
    }
}

impl ScriptSink for Outbox {
    fn push(&self, call: ScriptCall) {
        let schedule = {
            let mut state = lock(&self.state);
            state.pending.push(call);
            state.claim_flush()
        };
        if schedule {
            self.schedule_flush();
        }
    }
}

/// A descriptor that passed validation, ready for the native-modules queue.
struct PreparedCall {
    batch_id: u64,
    module_id: ModuleId,
    method_id: MethodId,
    args: Vec<Value>,
    promise: Option<Promise>,
}

struct Core {
    registry: Arc<ModuleRegistry>,
    engine: Mutex<Box<dyn ScriptEngine>>,
    script: ExecutionQueue,
    native: ExecutionQueue,
    outbox: Arc<Outbox>,
    sink: Arc<dyn ScriptSink>,
    callbacks: Arc<CallbackTracker>,
    cancellations: Arc<CancellationRegistry<String>>,
    listener: Arc<dyn BridgeListener>,
    phase: AtomicU8,
    in_flight: AtomicUsize,
    next_batch: AtomicU64,
}

impl Core {
    fn set_phase(&self, phase: BridgePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Script queue: deliver pending script-bound calls.
    fn flush_outbox(self: &Arc<Self>) {
        let calls = self.outbox.take();
        if !calls.is_empty() {
            self.deliver(calls);
        }
    }

    /// Script queue: run the engine for each call and dispatch everything it
    /// queued as one batch.
    fn deliver(self: &Arc<Self>, calls: Vec<ScriptCall>) {
        self.set_phase(BridgePhase::Receiving);
        let mut merged: Option<DecodedBatch> = None;
        {
            let mut engine = lock(&self.engine);
            for call in calls {
                let returned = match &call {
                    ScriptCall::CallFunction {
                        module,
                        method,
                        args,
                    } => engine.call_function(module, method, args),
                    ScriptCall::InvokeCallback { callback_id, args } => {
                        engine.invoke_callback(*callback_id, args)
                    }
                };
                match returned {
                    Ok(flushed) => self.merge(&mut merged, &flushed),
                    Err(err) => self.report_batch_failure(BridgeError::Script(err)),
                }
            }
        }
        self.dispatch_merged(merged);
    }

    fn merge(&self, merged: &mut Option<DecodedBatch>, flushed: &Value) {
        match FlushedQueue::decode(flushed) {
            Ok(Some(batch)) => match merged {
                Some(existing) => existing.extend(batch),
                None => *merged = Some(batch),
            },
            Ok(None) => {}
            Err(err) => self.report_batch_failure(err.into()),
        }
    }

    fn dispatch_merged(self: &Arc<Self>, merged: Option<DecodedBatch>) {
        match merged {
            Some(batch) => {
                self.dispatch(batch);
            }
            None => self.settle_phase(),
        }
    }

    fn report_batch_failure(&self, error: BridgeError) {
        tracing::warn!(error = %error, "flushed queue rejected");
        self.listener.batch_failed(&error);
    }

    /// Validate every descriptor and schedule the valid ones in order.
    fn dispatch(self: &Arc<Self>, batch: DecodedBatch) -> u64 {
        self.set_phase(BridgePhase::Dispatching);
        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(batch_id, calls = batch.len(), "batch received");

        let mut accepted = Vec::with_capacity(batch.len());
        let mut rejected = 0;
        for (index, entry) in batch.calls.into_iter().enumerate() {
            match entry
                .map_err(BridgeError::from)
                .and_then(|call| self.prepare(batch_id, call))
            {
                Ok(call) => accepted.push(call),
                Err(err) => {
                    rejected += 1;
                    tracing::warn!(batch_id, index, error = %err, "call rejected");
                    self.listener.call_rejected(batch_id, index, &err);
                }
            }
        }

        let dispatched = accepted.len();
        if dispatched > 0 {
            self.schedule(batch_id, accepted);
        } else {
            self.settle_phase();
        }
        tracing::debug!(batch_id, dispatched, rejected, "batch dispatched");
        self.listener.batch_dispatched(batch_id, dispatched, rejected);
        batch_id
    }

    fn prepare(&self, batch_id: u64, call: CallDescriptor) -> Result<PreparedCall, BridgeError> {
        let (module, method) = self.registry.validate(&call)?;
        let mut args = call.args;
        let promise = match &method.handler {
            Handler::Async(_) => None,
            Handler::Promise(_) => {
                // Validation guarantees two trailing callback ids.
                let reject = args.pop().and_then(|v| v.as_u64()).unwrap_or_default();
                let resolve = args.pop().and_then(|v| v.as_u64()).unwrap_or_default();
                Some(self.callbacks.promise(
                    self.sink.clone(),
                    CallbackId(resolve),
                    CallbackId(reject),
                )?)
            }
            Handler::Sync(_) => {
                return Err(BridgeError::SynchronousOnly {
                    module: module.name().to_string(),
                    method: method.name().to_string(),
                });
            }
        };
        Ok(PreparedCall {
            batch_id,
            module_id: call.module_id,
            method_id: call.method_id,
            args,
            promise,
        })
    }

    fn schedule(self: &Arc<Self>, batch_id: u64, calls: Vec<PreparedCall>) {
        self.outbox.hold();
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        for call in calls {
            let core = self.clone();
            if let Err(err) = self.native.enqueue(move || core.invoke(call)) {
                self.report_batch_failure(err.into());
                break;
            }
        }

        let core = self.clone();
        if let Err(err) = self.native.enqueue(move || core.finish_batch(batch_id)) {
            tracing::debug!(batch_id, error = %err, "batch completion not scheduled");
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.outbox.release();
            self.settle_phase();
        }
    }

    /// Native-modules queue: run one call.
    fn invoke(&self, call: PreparedCall) {
        let Ok((module, method)) = self.registry.method(call.module_id, call.method_id) else {
            return;
        };
        let ctx = CallContext::new(
            module.name(),
            method.name(),
            &self.sink,
            &self.callbacks,
            &self.cancellations,
        );
        tracing::trace!(batch_id = call.batch_id, module = %module.name(), method = %method.name(), "invoking");

        let result = match (&method.handler, call.promise) {
            (Handler::Async(handler), _) => handler(&ctx, &call.args),
            (Handler::Promise(handler), Some(promise)) => {
                let result = handler(&ctx, &call.args, promise.clone());
                if let Err(err) = &result {
                    promise.reject_error(err);
                }
                result
            }
            (Handler::Promise(_), None) | (Handler::Sync(_), _) => Ok(()),
        };

        if let Err(err) = result {
            tracing::error!(
                module = %module.name(),
                method = %method.name(),
                error = %format!("{err:#}"),
                "native module method failed"
            );
            self.listener.handler_failed(module.name(), method.name(), &err);
        }
    }

    /// Native-modules queue: after the last call of a batch.
    fn finish_batch(&self, batch_id: u64) {
        for (module, err) in self.registry.run_batch_complete() {
            tracing::error!(module = %module, error = %format!("{err:#}"), "batch-complete hook failed");
            self.listener.handler_failed(module, "onBatchComplete", &err);
        }
        self.set_phase(BridgePhase::Flushing);
        tracing::trace!(batch_id, "batch complete");
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.outbox.release();
        self.settle_phase();
    }

    fn settle_phase(&self) {
        if self.in_flight.load(Ordering::Acquire) == 0 {
            self.set_phase(BridgePhase::Idle);
        }
    }
}

/// Handle to one bridge instance. Clones share the instance.
#[derive(Clone)]
pub struct MessageBridge {
    core: Arc<Core>,
}

impl MessageBridge {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        engine: Box<dyn ScriptEngine>,
        script: ExecutionQueue,
        native: ExecutionQueue,
        listener: Arc<dyn BridgeListener>,
    ) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<Core>| {
            let outbox = Arc::new(Outbox {
                state: Mutex::new(OutboxState::default()),
                script: script.clone(),
                core: weak.clone(),
            });
            Core {
                registry,
                engine: Mutex::new(engine),
                script,
                native,
                sink: outbox.clone(),
                outbox,
                callbacks: CallbackTracker::new(),
                cancellations: Arc::new(CancellationRegistry::new()),
                listener,
                phase: AtomicU8::new(BridgePhase::Idle as u8),
                in_flight: AtomicUsize::new(0),
                next_batch: AtomicU64::new(1),
            }
        });
        Self { core }
    }

    /// Hand the module configuration to the engine, waiting for it.
    pub fn initialize(&self) -> Result<(), BridgeError> {
        let core = self.core.clone();
        self.core
            .script
            .enqueue_and_wait(move || {
                let config = core.registry.module_descriptions();
                lock(&core.engine).initialize(&config)
            })?
            .map_err(BridgeError::Script)
    }

    /// Call a script module function.
    pub fn call_function(
        &self,
        module: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<(), BridgeError> {
        let call = ScriptCall::CallFunction {
            module: module.into(),
            method: method.into(),
            args,
        };
        self.run_on_script(move |core| core.deliver(vec![call]))
    }

    /// Invoke a script callback.
    pub fn invoke_callback(&self, callback_id: CallbackId, args: Vec<Value>) -> Result<(), BridgeError> {
        let call = ScriptCall::InvokeCallback { callback_id, args };
        self.run_on_script(move |core| core.deliver(vec![call]))
    }

    /// Ask the engine for whatever it has queued and dispatch it.
    pub fn flush_script_queue(&self) -> Result<(), BridgeError> {
        self.run_on_script(|core| {
            core.set_phase(BridgePhase::Receiving);
            let returned = lock(&core.engine).flush_queue();
            let mut merged = None;
            match returned {
                Ok(flushed) => core.merge(&mut merged, &flushed),
                Err(err) => core.report_batch_failure(BridgeError::Script(err)),
            }
            core.dispatch_merged(merged);
        })
    }

    /// Dispatch a flushed queue the script side pushed directly.
    ///
    /// Returns the batch id, or `None` for an empty (`null`) queue.
    pub fn dispatch_flushed(&self, flushed: &Value) -> Result<Option<u64>, BridgeError> {
        let batch = match FlushedQueue::decode(flushed) {
            Ok(Some(batch)) => batch,
            Ok(None) => return Ok(None),
            Err(err) => {
                let err = BridgeError::from(err);
                self.core.listener.batch_failed(&err);
                return Err(err);
            }
        };
        Ok(Some(self.core.dispatch(batch)))
    }

    /// Run a synchronous method on the calling context.
    pub fn call_sync(&self, module_id: ModuleId, method_id: MethodId, args: &[Value]) -> Result<Value, BridgeError> {
        let (module, method) = self.core.registry.method(module_id, method_id)?;
        let Handler::Sync(handler) = &method.handler else {
            return Err(BridgeError::NotSynchronous {
                module: module.name().to_string(),
                method: method.name().to_string(),
            });
        };
        check_args(module, method, args)?;
        handler(args).map_err(|error| BridgeError::Handler {
            module: module.name().to_string(),
            method: method.name().to_string(),
            error,
        })
    }

    pub fn phase(&self) -> BridgePhase {
        BridgePhase::from_u8(self.core.phase.load(Ordering::Acquire))
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.core.registry
    }

    /// Where native code pushes script-bound calls.
    pub fn sink(&self) -> Arc<dyn ScriptSink> {
        self.core.sink.clone()
    }

    pub fn callbacks(&self) -> &Arc<CallbackTracker> {
        &self.core.callbacks
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry<String>> {
        &self.core.cancellations
    }

    /// Cancel all outstanding cancellable work.
    pub fn shutdown(&self) {
        self.core.cancellations.cancel_all();
        tracing::debug!("bridge shut down");
    }

    fn run_on_script<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&Arc<Core>) + Send + 'static,
    {
        let core = self.core.clone();
        self.core.script.enqueue(move || task(&core))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_claims_one_flush() {
        let mut state = OutboxState::default();
        assert!(!state.claim_flush());
        state.pending.push(ScriptCall::InvokeCallback {
            callback_id: CallbackId(1),
            args: vec![],
        });
        assert!(state.claim_flush());
        assert!(!state.claim_flush());
    }

    #[test]
    fn test_held_outbox_waits() {
        let mut state = OutboxState {
            holds: 1,
            ..OutboxState::default()
        };
        state.pending.push(ScriptCall::InvokeCallback {
            callback_id: CallbackId(1),
            args: vec![],
        });
        assert!(!state.claim_flush());
        state.holds = 0;
        assert!(state.claim_flush());
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            BridgePhase::Idle,
            BridgePhase::Receiving,
            BridgePhase::Dispatching,
            BridgePhase::Flushing,
        ] {
            assert_eq!(BridgePhase::from_u8(phase as u8), phase);
        }
    }
}
