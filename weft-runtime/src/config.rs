//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! { "disposal": "discard", "frame_interval_ms": 8 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use weft_queue::DisposalPolicy;

use crate::RuntimeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Applied to every owned queue at shutdown.
    pub disposal: DisposalPolicy,
    /// Choreographer tick period. `0` disables the ticker thread; frames are
    /// then driven by [`crate::Runtime::tick`].
    pub frame_interval_ms: u64,
    /// Upper bound of pooled event batch buffers.
    pub event_pool_capacity: usize,
    /// Events delivered per script-queue flush; the rest wait a frame.
    pub max_events_per_flush: usize,
    /// Default tracing directive when neither `WEFT_LOG` nor `RUST_LOG` is set.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            disposal: DisposalPolicy::Drain,
            frame_interval_ms: 16,
            event_pool_capacity: 16,
            max_events_per_flush: 256,
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RuntimeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Configuration for manually ticked frames.
    pub fn manual_frames(mut self) -> Self {
        self.frame_interval_ms = 0;
        self
    }
}
