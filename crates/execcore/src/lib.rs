//! Core data model for flow execution
//!
//! This crate provides the flow-graph definition, the per-run executable
//! flow, and the project/permission types that all other components depend
//! on. It has no runtime dependencies.

mod error;
mod executable;
mod graph;
mod project;
mod status;

pub use error::{ExecutorError, GraphError, ProjectError};
pub use executable::{ExecutableFlow, ExecutableNode, UNSET_TIME};
pub use graph::{FlowGraph, GraphNode};
pub use project::{Capability, Project, User};
pub use status::Status;

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;
