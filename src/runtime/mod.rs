//! Runtime execution
//!
//! The engine walks one validated graph per run; the queue runs jobs off the
//! request path, on an external transport when one is configured.

pub mod engine;
pub mod queue;

pub use engine::{CancelHandle, CancelSignal, ExecutionEngine, ExecutionLimits};
pub use queue::{JobEnvelope, JobQueue, JobReceipt, QueueMode, QueueTransport, WorkQueue};
