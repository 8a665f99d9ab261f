use crate::FlowGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Capability a user must hold on a project to perform an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Read,
    Execute,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Read => f.write_str("READ"),
            Capability::Execute => f.write_str("EXECUTE"),
        }
    }
}

/// Authenticated caller identity. Session management lives outside this
/// core; only the resolved user id matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A project: named flow graphs, the versioned source-file directory, and
/// the per-user permission table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub flows: HashMap<String, FlowGraph>,
    /// Directory holding the uploaded source files for the current version.
    /// Absent for projects with nothing to copy at submission time.
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub permissions: HashMap<String, HashSet<Capability>>,
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flows: HashMap::new(),
            source_dir: None,
            permissions: HashMap::new(),
        }
    }

    pub fn add_flow(&mut self, graph: FlowGraph) -> &mut Self {
        self.flows.insert(graph.flow_id.clone(), graph);
        self
    }

    pub fn flow(&self, flow_id: &str) -> Option<&FlowGraph> {
        self.flows.get(flow_id)
    }

    pub fn grant(&mut self, user_id: impl Into<String>, capability: Capability) -> &mut Self {
        self.permissions
            .entry(user_id.into())
            .or_default()
            .insert(capability);
        self
    }

    pub fn has_permission(&self, user: &User, capability: Capability) -> bool {
        self.permissions
            .get(&user.id)
            .is_some_and(|caps| caps.contains(&capability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_are_per_capability() {
        let mut project = Project::new("p1");
        project.grant("u1", Capability::Read);

        let u1 = User::new("u1");
        assert!(project.has_permission(&u1, Capability::Read));
        assert!(!project.has_permission(&u1, Capability::Execute));
        assert!(!project.has_permission(&User::new("u2"), Capability::Read));
    }

    #[test]
    fn capability_wire_names() {
        assert_eq!(
            serde_json::to_string(&Capability::Execute).unwrap(),
            "\"EXECUTE\""
        );
        assert_eq!(Capability::Read.to_string(), "READ");
    }
}
