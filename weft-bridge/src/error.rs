//! Bridge error types.

use serde_json::{Map, Value};
use thiserror::Error;
use weft_api::{CallbackId, MethodId, ModuleId, ProtocolError};
use weft_queue::QueueError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{module}.{method}: argument {index} is invalid: {reason}")]
    InvalidArgument {
        module: String,
        method: String,
        index: usize,
        reason: String,
    },

    #[error("{module}.{method} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        module: String,
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("unknown native module {0}")]
    UnknownModule(ModuleId),

    #[error("module '{module}' has no {method}")]
    UnknownMethod { module: String, method: MethodId },

    #[error("{module}.{method} is not a synchronous method")]
    NotSynchronous { module: String, method: String },

    #[error("{module}.{method} is synchronous and cannot be called from a batch")]
    SynchronousOnly { module: String, method: String },

    #[error("native module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("module '{module}' declares method '{method}' twice")]
    DuplicateMethod { module: String, method: String },

    #[error("{0} is already pending")]
    DuplicateCallbackId(CallbackId),

    #[error("too many distinct event names")]
    EventTypeOverflow,

    #[error("{module}.{method} failed: {error:#}")]
    Handler {
        module: String,
        method: String,
        error: anyhow::Error,
    },

    #[error("script engine failed: {0:#}")]
    Script(anyhow::Error),

    #[error("malformed flushed queue: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A failure raised by native code that carries a rejection code and
/// structured detail for the script side.
///
/// Handlers return it inside an `anyhow::Error`; promise rejection looks for
/// it anywhere in the error chain.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NativeError {
    pub code: String,
    pub message: String,
    pub user_info: Option<Map<String, Value>>,
}

impl NativeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            user_info: None,
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_info
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}
