//! Weft API - Shared types and wire protocol for the script/native bridge.

mod call;
mod error;
mod event;
mod ids;
mod mutation;

pub use call::*;
pub use error::ProtocolError;
pub use event::*;
pub use ids::*;
pub use mutation::*;

/// Argument and payload values exchanged with the script side.
pub use serde_json::Value;

/// Insertion-ordered property map (view props, module constants).
pub type PropMap = indexmap::IndexMap<String, Value>;
