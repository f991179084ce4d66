//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;
use weft_bridge::BridgeError;
use weft_queue::QueueError;
use weft_shadow::ShadowError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("failed to start frame ticker: {0}")]
    Ticker(#[source] std::io::Error),

    #[error("runtime is disposed")]
    Disposed,

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Shadow(#[from] ShadowError),
}
