use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Cannot find execution '{0}'")]
    ExecutionNotFound(String),

    #[error("Error setting up execution directory: {0}")]
    Provisioning(String),

    #[error("Error copying project source files: {0}")]
    SourceCopy(String),

    #[error("Scheduler rejected execution: {0}")]
    SchedulerRejection(String),

    #[error("Unknown node '{node}' in disabled overrides for flow {flow}")]
    InvalidOverride { node: String, flow: String },

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures resolving projects, flows, and user capabilities. The message
/// strings are surfaced verbatim to clients and are part of the contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("Project {0} not found.")]
    NotFound(String),

    #[error("User {user} doesn't have {capability} permissions on {project}")]
    PermissionDenied {
        user: String,
        capability: String,
        project: String,
    },

    #[error("Flow {flow} cannot be found in project {project}")]
    FlowNotFound { flow: String, project: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id '{0}' in flow graph")]
    DuplicateNode(String),

    #[error("Edge references unknown node '{0}'")]
    UnknownNode(String),

    #[error("Cyclic dependency detected in flow {0}")]
    CyclicDependency(String),
}
