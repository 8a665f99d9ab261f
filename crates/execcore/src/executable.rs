use crate::{FlowGraph, GraphError, Status};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sentinel for a timestamp that has not been set yet.
pub const UNSET_TIME: i64 = -1;

/// Per-run record for a single graph node. The engine updates the
/// (status, start_time, end_time) triple as a unit under the flow's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableNode {
    pub id: String,
    pub level: u32,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
    pub out_nodes: Vec<String>,
}

impl ExecutableNode {
    /// Whether this node belongs in a delta for a client that last polled
    /// at `since`. A client without a meaningful watermark (`since <= 0`)
    /// gets every node. A node that has started but not yet finished is
    /// always reported: its status can still move, so omitting it would
    /// let a poller miss transitions behind its watermark.
    pub fn changed_since(&self, since: i64) -> bool {
        if since <= 0 {
            return true;
        }
        if self.start_time >= since || self.end_time >= since {
            return true;
        }
        self.start_time != UNSET_TIME && self.end_time == UNSET_TIME
    }
}

/// One execution attempt of a flow graph: per-node state records plus the
/// run-level metadata. Created at submission, mutated by the engine while
/// running, immutable once the overall status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableFlow {
    pub execution_id: String,
    pub project_id: String,
    pub flow_id: String,
    pub submit_user: String,
    pub submit_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub status: Status,
    pub nodes: Vec<ExecutableNode>,
    pub execution_path: Option<PathBuf>,
}

impl ExecutableFlow {
    /// Materialize a run from a flow graph: one node record per graph node,
    /// order preserved, everything `READY`, timestamps unset. Fails if the
    /// graph itself is invalid (cycle, duplicate or dangling node).
    pub fn from_graph(
        execution_id: impl Into<String>,
        project_id: impl Into<String>,
        graph: &FlowGraph,
    ) -> Result<Self, GraphError> {
        let levels = graph.levels()?;

        let nodes = graph
            .nodes
            .iter()
            .map(|n| ExecutableNode {
                id: n.id.clone(),
                level: levels[&n.id],
                status: Status::Ready,
                start_time: UNSET_TIME,
                end_time: UNSET_TIME,
                out_nodes: n.out_nodes.clone(),
            })
            .collect();

        Ok(Self {
            execution_id: execution_id.into(),
            project_id: project_id.into(),
            flow_id: graph.flow_id.clone(),
            submit_user: String::new(),
            submit_time: Utc::now().timestamp_millis(),
            start_time: UNSET_TIME,
            end_time: UNSET_TIME,
            status: Status::Ready,
            nodes,
            execution_path: None,
        })
    }

    pub fn node(&self, id: &str) -> Option<&ExecutableNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Set a node's status, e.g. applying a DISABLED override at submission.
    pub fn set_node_status(&mut self, id: &str, status: Status) -> Result<(), GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        node.status = status;
        Ok(())
    }

    /// Engine-side transition: node begins running at `at`.
    pub fn mark_node_started(&mut self, id: &str, at: i64) -> Result<(), GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        node.status = Status::Running;
        node.start_time = at;
        Ok(())
    }

    /// Engine-side transition: node reaches `status` at `at`.
    pub fn mark_node_finished(
        &mut self,
        id: &str,
        status: Status,
        at: i64,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        node.status = status;
        node.end_time = at;
        Ok(())
    }

    pub fn mark_started(&mut self, at: i64) {
        self.status = Status::Running;
        self.start_time = at;
    }

    pub fn mark_finished(&mut self, status: Status, at: i64) {
        self.status = status;
        self.end_time = at;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
