//! Weft Runtime - Wires queues, bridge, shadow tree and frames into one instance.
//!
//! - `runtime`: [`Runtime`] construction, diagnostics, teardown
//! - `ui_manager`: the built-in `UIManager` module (script → shadow tree → UI)
//! - `choreographer`: per-frame phase scheduler
//! - `config`: [`RuntimeConfig`] (JSON, every field defaulted)
//! - `logging`: tracing subscriber setup

pub mod choreographer;
pub mod config;
pub mod logging;
pub mod ui_manager;

mod error;
mod runtime;

pub use choreographer::{Choreographer, FrameCallback, FramePhase};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use runtime::{Runtime, RuntimeEvent};
pub use ui_manager::UiManager;
