//! Workflow definitions, execution context, graph validation, persistence and
//! the hot-reload registry

pub mod context;
pub mod graph;
pub mod registry;
pub mod storage;
pub mod types;

pub use context::ExecutionContext;
pub use registry::WorkflowRegistry;
pub use storage::{PgWorkflowStore, WorkflowStore};
pub use types::{
    BlockCategory, BlockResult, Branch, Edge, ExecutionJob, ExecutionResponse, Node, NodeResult, Workflow,
};
