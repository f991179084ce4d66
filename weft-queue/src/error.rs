//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{queue}' is disposed")]
    Disposed { queue: String },

    #[error("waiting on queue '{queue}' from its own context would deadlock")]
    WouldDeadlock { queue: String },

    #[error("task on queue '{queue}' did not complete: {reason}")]
    TaskFailed { queue: String, reason: String },

    #[error("failed to start thread for queue '{queue}': {source}")]
    Spawn {
        queue: String,
        #[source]
        source: std::io::Error,
    },
}
