//! Wire protocol errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("flushed queue must be an array, got {0}")]
    NotAnArray(&'static str),

    #[error("flushed queue is missing its {0} sequence")]
    MissingSequence(&'static str),

    #[error("flushed queue sequences disagree in length: {modules} modules, {methods} methods, {params} argument lists")]
    LengthMismatch {
        modules: usize,
        methods: usize,
        params: usize,
    },

    #[error("invalid {field} at index {index}: {reason}")]
    InvalidEntry {
        field: &'static str,
        index: usize,
        reason: String,
    },
}
