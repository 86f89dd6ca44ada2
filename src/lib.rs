//! appflow: workflow execution engine for no-code apps
//!
//! Visual workflows (triggers, conditions, actions) are validated into a
//! graph and walked against a shared context. Action blocks reach app data
//! through a dynamic-table layer that validates every identifier, binds every
//! value and checks app ownership before touching Postgres.

pub mod config;
pub mod error;

// Dynamic-table data layer: identifiers, values, queries, schema, rate limits
pub mod datatable;

// Side-effect collaborators: media, mail, AI, publishing
pub mod services;

pub mod blocks;
pub mod workflow;
pub mod runtime;
pub mod api;
pub mod server;

pub use blocks::{Block, BlockServices, BlockSettings};
pub use runtime::{ExecutionEngine, WorkQueue};
pub use server::start_server;
pub use workflow::{Edge, ExecutionJob, Node, Workflow};
