//! Events delivered to the script side's event emitter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ScriptCall, ViewTag};

/// Script module that receives UI events.
pub const EVENT_EMITTER_MODULE: &str = "RCTEventEmitter";

/// An event as consumed by the script side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptEvent {
    /// `receiveEvent(targetId, eventName, payload)`
    Event {
        target: ViewTag,
        name: String,
        payload: Value,
    },

    /// `receiveTouches(eventName, touchList, changedIndices)`
    Touches {
        name: String,
        touches: Vec<Value>,
        changed_indices: Vec<usize>,
    },
}

impl ScriptEvent {
    pub fn name(&self) -> &str {
        match self {
            ScriptEvent::Event { name, .. } | ScriptEvent::Touches { name, .. } => name,
        }
    }

    /// Convert into the emitter call the script side expects.
    pub fn into_script_call(self) -> ScriptCall {
        match self {
            ScriptEvent::Event {
                target,
                name,
                payload,
            } => ScriptCall::CallFunction {
                module: EVENT_EMITTER_MODULE.to_string(),
                method: "receiveEvent".to_string(),
                args: vec![Value::from(target.0), Value::String(name), payload],
            },
            ScriptEvent::Touches {
                name,
                touches,
                changed_indices,
            } => ScriptCall::CallFunction {
                module: EVENT_EMITTER_MODULE.to_string(),
                method: "receiveTouches".to_string(),
                args: vec![
                    Value::String(name),
                    Value::Array(touches),
                    Value::Array(changed_indices.into_iter().map(Value::from).collect()),
                ],
            },
        }
    }
}
