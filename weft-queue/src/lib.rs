//! Weft Queue - FIFO execution queues bound to a single execution context.
//!
//! Every higher layer of the runtime schedules onto an [`ExecutionQueue`].
//! A [`QueueConfiguration`] wires the four standard queues (UI, layout,
//! native modules, script) together and disposes the ones it owns.

mod config;
mod error;
mod queue;

pub use config::{QueueConfiguration, QueueConfigurationSpec, QueueKind, QueueSource};
pub use error::QueueError;
pub use queue::{DisposalPolicy, ErrorHandler, ExecutionQueue, LoopPump};
