//! Settle-once completions routed back to the script side.
//!
//! A [`Promise`] owns a resolve/reject pair of script callback ids, a
//! [`Callback`] owns a single id. Either settles at most once: the first
//! call delivers a [`ScriptCall`] to the [`ScriptSink`], later calls are
//! no-ops. Pending ids are tracked so a still-pending id cannot be reused.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value, json};
use weft_api::{CallbackId, ScriptCall};

use crate::{BridgeError, NativeError};

/// Rejection code used when the failure does not carry its own.
pub const DEFAULT_REJECT_CODE: &str = "EUNSPECIFIED";

/// Destination of script-bound calls.
pub trait ScriptSink: Send + Sync {
    fn push(&self, call: ScriptCall);
}

/// Set of callback ids with an unsettled completion.
#[derive(Debug, Default)]
pub struct CallbackTracker {
    pending: Mutex<HashSet<CallbackId>>,
}

impl CallbackTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind a resolve/reject pair.
    pub fn promise(
        self: &Arc<Self>,
        sink: Arc<dyn ScriptSink>,
        resolve: CallbackId,
        reject: CallbackId,
    ) -> Result<Promise, BridgeError> {
        if resolve == reject {
            return Err(BridgeError::DuplicateCallbackId(reject));
        }
        let ids = vec![resolve, reject];
        self.reserve(&ids)?;
        Ok(Promise {
            inner: Arc::new(Settle::new(ids, sink, self.clone())),
        })
    }

    /// Bind a one-shot callback.
    pub fn callback(
        self: &Arc<Self>,
        sink: Arc<dyn ScriptSink>,
        id: CallbackId,
    ) -> Result<Callback, BridgeError> {
        self.reserve(&[id])?;
        Ok(Callback {
            inner: Arc::new(Settle::new(vec![id], sink, self.clone())),
        })
    }

    pub fn is_pending(&self, id: CallbackId) -> bool {
        self.lock().contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn reserve(&self, ids: &[CallbackId]) -> Result<(), BridgeError> {
        let mut pending = self.lock();
        if let Some(id) = ids.iter().find(|id| pending.contains(id)) {
            return Err(BridgeError::DuplicateCallbackId(*id));
        }
        pending.extend(ids.iter().copied());
        Ok(())
    }

    fn release(&self, ids: &[CallbackId]) {
        let mut pending = self.lock();
        for id in ids {
            pending.remove(id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<CallbackId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared settle-once state.
struct Settle {
    ids: Vec<CallbackId>,
    settled: AtomicBool,
    sink: Arc<dyn ScriptSink>,
    tracker: Arc<CallbackTracker>,
}

impl Settle {
    fn new(ids: Vec<CallbackId>, sink: Arc<dyn ScriptSink>, tracker: Arc<CallbackTracker>) -> Self {
        Self {
            ids,
            settled: AtomicBool::new(false),
            sink,
            tracker,
        }
    }

    /// Win the right to settle. Only the first caller gets `true`.
    fn claim(&self) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tracker.release(&self.ids);
        true
    }

    fn deliver(&self, callback_id: CallbackId, args: Vec<Value>) {
        self.sink.push(ScriptCall::InvokeCallback { callback_id, args });
    }
}

impl Drop for Settle {
    fn drop(&mut self) {
        if !*self.settled.get_mut() {
            tracing::debug!(ids = ?self.ids, "completion dropped without settling");
            self.tracker.release(&self.ids);
        }
    }
}

/// Script-side promise awaiting a native result.
///
/// Clones share the same settle-once state.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<Settle>,
}

impl Promise {
    /// Resolve with `value`. Returns `false` if already settled.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        if !self.inner.claim() {
            return false;
        }
        self.inner.deliver(self.inner.ids[0], vec![value.into()]);
        true
    }

    /// Reject with an explicit code. Returns `false` if already settled.
    pub fn reject(
        &self,
        code: &str,
        message: &str,
        user_info: Option<Map<String, Value>>,
    ) -> bool {
        self.settle_rejected(reject_payload(Some(code), message, None, user_info))
    }

    /// Reject from a failure, picking up a [`NativeError`] in its chain.
    pub fn reject_error(&self, error: &anyhow::Error) -> bool {
        self.settle_rejected(error_payload(error))
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    fn settle_rejected(&self, payload: Value) -> bool {
        if !self.inner.claim() {
            return false;
        }
        self.inner.deliver(self.inner.ids[1], vec![payload]);
        true
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("resolve", &self.inner.ids[0])
            .field("reject", &self.inner.ids[1])
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// One-shot script callback.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<Settle>,
}

impl Callback {
    pub fn id(&self) -> CallbackId {
        self.inner.ids[0]
    }

    /// Invoke with `args`. Returns `false` if already invoked.
    pub fn invoke(&self, args: Vec<Value>) -> bool {
        if !self.inner.claim() {
            return false;
        }
        self.inner.deliver(self.id(), args);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id())
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// The object handed to the script-side reject function.
pub fn reject_payload(
    code: Option<&str>,
    message: &str,
    stack: Option<String>,
    user_info: Option<Map<String, Value>>,
) -> Value {
    json!({
        "code": code.unwrap_or(DEFAULT_REJECT_CODE),
        "message": message,
        "stack": stack,
        "userInfo": user_info,
    })
}

fn error_payload(error: &anyhow::Error) -> Value {
    let stack = (error.chain().count() > 1).then(|| format!("{error:#}"));
    match error.chain().find_map(|cause| cause.downcast_ref::<NativeError>()) {
        Some(native) => reject_payload(
            Some(&native.code),
            &native.message,
            stack,
            native.user_info.clone(),
        ),
        None => reject_payload(None, &error.to_string(), stack, None),
    }
}
