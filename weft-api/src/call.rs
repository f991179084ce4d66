//! Call descriptors and the flushed-queue wire shape.
//!
//! A flushed queue is a JSON array of three parallel sequences plus an
//! optional trailing call id:
//!
//! ```text
//! [[module ids], [method ids], [[args], [args], ...], call_id?]
//! ```
//!
//! Structural problems (not an array, sequences of different lengths) reject
//! the whole batch. Problems with a single entry only reject that entry, so
//! the rest of the batch can still dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallbackId, MethodId, ModuleId, ProtocolError};

/// One script-to-native call inside a flushed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub module_id: ModuleId,
    pub method_id: MethodId,
    pub args: Vec<Value>,
}

/// A native-to-script call waiting to be delivered on the script queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptCall {
    /// Invoke `module.method(args)` on the script side.
    CallFunction {
        module: String,
        method: String,
        args: Vec<Value>,
    },
    /// Invoke a callback the script side registered under `callback_id`.
    InvokeCallback {
        callback_id: CallbackId,
        args: Vec<Value>,
    },
}

/// A decoded batch: one result per entry, in receipt order.
#[derive(Debug)]
pub struct DecodedBatch {
    pub calls: Vec<Result<CallDescriptor, ProtocolError>>,
    pub call_id: Option<u64>,
}

impl DecodedBatch {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Append another batch, keeping receipt order.
    pub fn extend(&mut self, other: DecodedBatch) {
        self.calls.extend(other.calls);
        if other.call_id.is_some() {
            self.call_id = other.call_id;
        }
    }
}

/// Typed form of the flushed-queue structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushedQueue {
    pub module_ids: Vec<ModuleId>,
    pub method_ids: Vec<MethodId>,
    pub params: Vec<Vec<Value>>,
    pub call_id: Option<u64>,
}

impl FlushedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: CallDescriptor) {
        self.module_ids.push(call.module_id);
        self.method_ids.push(call.method_id);
        self.params.push(call.args);
    }

    pub fn len(&self) -> usize {
        self.module_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_ids.is_empty()
    }

    /// Iterate the parallel sequences as call descriptors.
    pub fn calls(&self) -> impl Iterator<Item = CallDescriptor> + '_ {
        self.module_ids
            .iter()
            .zip(&self.method_ids)
            .zip(&self.params)
            .map(|((module_id, method_id), args)| CallDescriptor {
                module_id: *module_id,
                method_id: *method_id,
                args: args.clone(),
            })
    }

    /// Encode into the wire shape.
    pub fn to_value(&self) -> Value {
        let modules = self.module_ids.iter().map(|m| Value::from(m.0)).collect();
        let methods = self.method_ids.iter().map(|m| Value::from(m.0)).collect();
        let params = self.params.iter().map(|a| Value::Array(a.clone())).collect();
        let mut out = vec![Value::Array(modules), Value::Array(methods), Value::Array(params)];
        if let Some(id) = self.call_id {
            out.push(Value::from(id));
        }
        Value::Array(out)
    }

    /// Decode the wire shape.
    ///
    /// `null` means the script side has nothing queued and yields `Ok(None)`.
    pub fn decode(value: &Value) -> Result<Option<DecodedBatch>, ProtocolError> {
        let parts = match value {
            Value::Null => return Ok(None),
            Value::Array(parts) => parts,
            other => return Err(ProtocolError::NotAnArray(type_name(other))),
        };

        let modules = sequence(parts, 0, "module id")?;
        let methods = sequence(parts, 1, "method id")?;
        let params = sequence(parts, 2, "argument list")?;

        if modules.len() != methods.len() || modules.len() != params.len() {
            return Err(ProtocolError::LengthMismatch {
                modules: modules.len(),
                methods: methods.len(),
                params: params.len(),
            });
        }

        let call_id = parts.get(3).and_then(Value::as_u64);

        let calls = modules
            .iter()
            .zip(methods)
            .zip(params)
            .enumerate()
            .map(|(index, ((module, method), args))| decode_entry(index, module, method, args))
            .collect();

        Ok(Some(DecodedBatch { calls, call_id }))
    }
}

fn sequence<'a>(
    parts: &'a [Value],
    position: usize,
    name: &'static str,
) -> Result<&'a [Value], ProtocolError> {
    match parts.get(position) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) | None => Err(ProtocolError::MissingSequence(name)),
    }
}

fn decode_entry(
    index: usize,
    module: &Value,
    method: &Value,
    args: &Value,
) -> Result<CallDescriptor, ProtocolError> {
    let module_id = decode_id(module).ok_or_else(|| ProtocolError::InvalidEntry {
        field: "module id",
        index,
        reason: format!("expected a non-negative integer, got {}", type_name(module)),
    })?;
    let method_id = decode_id(method).ok_or_else(|| ProtocolError::InvalidEntry {
        field: "method id",
        index,
        reason: format!("expected a non-negative integer, got {}", type_name(method)),
    })?;
    let args = match args {
        Value::Array(items) => items.clone(),
        other => {
            return Err(ProtocolError::InvalidEntry {
                field: "argument list",
                index,
                reason: format!("expected an array, got {}", type_name(other)),
            });
        }
    };
    Ok(CallDescriptor {
        module_id: ModuleId(module_id),
        method_id: MethodId(method_id),
        args,
    })
}

fn decode_id(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

/// Short JSON type name for diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_is_empty() {
        assert!(FlushedQueue::decode(&Value::Null).unwrap().is_none());
    }

    #[test]
    fn test_decode_preserves_order() {
        let batch = FlushedQueue::decode(&json!([[42, 17], [16, 22], [[], ["foo"]]]))
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 2);
        let first = batch.calls[0].as_ref().unwrap();
        assert_eq!(first.module_id, ModuleId(42));
        assert_eq!(first.method_id, MethodId(16));
        assert!(first.args.is_empty());
        let second = batch.calls[1].as_ref().unwrap();
        assert_eq!(second.module_id, ModuleId(17));
        assert_eq!(second.args, vec![json!("foo")]);
    }

    #[test]
    fn test_trailing_call_id() {
        let batch = FlushedQueue::decode(&json!([[1], [1], [[1, 2, 3]], 42]))
            .unwrap()
            .unwrap();
        assert_eq!(batch.call_id, Some(42));
    }

    #[test]
    fn test_length_mismatch_rejects_batch() {
        let err = FlushedQueue::decode(&json!([[1, 2], [1], [[]]])).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { modules: 2, .. }));
    }

    #[test]
    fn test_not_an_array() {
        let err = FlushedQueue::decode(&json!("nope")).unwrap_err();
        assert_eq!(err, ProtocolError::NotAnArray("string"));
    }

    #[test]
    fn test_bad_entry_only_rejects_entry() {
        let batch = FlushedQueue::decode(&json!([[0, 0], [0, 1], [null, [true]]]))
            .unwrap()
            .unwrap();
        assert!(matches!(
            batch.calls[0],
            Err(ProtocolError::InvalidEntry { field: "argument list", index: 0, .. })
        ));
        assert!(batch.calls[1].is_ok());
    }

    #[test]
    fn test_encode_shape() {
        let mut queue = FlushedQueue::new();
        queue.push(CallDescriptor {
            module_id: ModuleId(7),
            method_id: MethodId(3),
            args: vec![],
        });
        assert_eq!(queue.to_value(), json!([[7], [3], [[]]]));
        let calls: Vec<_> = queue.calls().collect();
        assert_eq!(calls[0].module_id, ModuleId(7));
    }
}
