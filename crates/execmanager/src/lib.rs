//! Execution management: store, project resolution, permission gate, and
//! the submission/synchronization service that the HTTP tier calls into.

mod gate;
mod project;
mod service;
mod store;

pub use gate::PermissionGate;
pub use project::{LocalProjectManager, ProjectManager};
pub use service::{
    Edge, ExecutionPageView, FlowExecService, FlowSnapshot, FlowUpdate, NodeSnapshot, NodeUpdate,
    Submission,
};
pub use store::{ExecutionStore, ExecutorManager, SharedFlow};
