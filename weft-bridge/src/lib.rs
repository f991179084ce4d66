//! Weft Bridge - The protocol engine between the script side and native code.
//!
//! This crate contains:
//! - Native module registration (typed method table, argument checks)
//! - The message bridge (batch decode, dispatch, coalesced flush)
//! - Promise and callback completions (settle-once)
//! - The cancellation registry for in-flight native work
//! - Event coalescing and the object pool it draws buffers from

mod bridge;
mod cancellation;
mod error;
mod events;
mod module;
mod pool;
mod promise;

pub use bridge::{BridgeListener, BridgePhase, MessageBridge, NoopListener, ScriptEngine};
pub use cancellation::{CancelToken, Cancelled, CancellationRegistry, Outcome, Registration};
pub use error::{BridgeError, NativeError};
pub use events::{EventDispatcher, EventListener, PendingEvent};
pub use module::{
    BatchCompleteHook, CallContext, Method, MethodHandler, MethodKind, ModuleBuilder,
    ModuleRegistry, NativeModule, Param, ParamKind, PromiseHandler, SyncHandler,
};
pub use pool::ObjectPool;
pub use promise::{Callback, CallbackTracker, DEFAULT_REJECT_CODE, Promise, ScriptSink, reject_payload};
