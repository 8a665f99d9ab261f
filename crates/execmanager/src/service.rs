use crate::{ExecutionStore, PermissionGate, ProjectManager, SharedFlow};
use execcore::{
    Capability, ExecutableFlow, ExecutorError, Result, Status, User,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// The submission and synchronization protocols over the execution store.
/// This is the whole request/response boundary: no background work happens
/// here, and no call blocks waiting for a run to finish.
pub struct FlowExecService {
    store: Arc<dyn ExecutionStore>,
    projects: Arc<dyn ProjectManager>,
    gate: PermissionGate,
}

/// Data for the execution status page.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPageView {
    pub execid: String,
    #[serde(rename = "projectName")]
    pub project_name: String,
    pub flowid: String,
}

/// Full snapshot of a run: every node, every edge, run metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<Edge>,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
    pub submit_time: i64,
    pub submit_user: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    pub level: u32,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub from: String,
    pub target: String,
}

/// Delta since a client watermark: only nodes that changed, plus the
/// always-included run metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowUpdate {
    pub nodes: Vec<NodeUpdate>,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
    pub submit_time: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub id: String,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
}

/// Receipt for an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub execid: String,
    pub project: String,
    pub flow: String,
}

impl FlowExecService {
    pub fn new(store: Arc<dyn ExecutionStore>, projects: Arc<dyn ProjectManager>) -> Self {
        let gate = PermissionGate::new(projects.clone());
        Self {
            store,
            projects,
            gate,
        }
    }

    /// Data for the execution page: resolves the run, then requires `READ`
    /// on its owning project.
    pub async fn execution_page(
        &self,
        execution_id: &str,
        user: &User,
    ) -> Result<ExecutionPageView> {
        let flow = self.store.get(execution_id).await?;
        let (project_id, flow_id) = {
            let f = flow.read().await;
            (f.project_id.clone(), f.flow_id.clone())
        };
        self.gate.check(&project_id, user, Capability::Read).await?;

        Ok(ExecutionPageView {
            execid: execution_id.to_string(),
            project_name: project_id,
            flowid: flow_id,
        })
    }

    /// Full snapshot of a run. Read-only; tolerates the engine mutating the
    /// flow concurrently by cloning under the read lock.
    pub async fn fetch_flow(&self, execution_id: &str, user: &User) -> Result<FlowSnapshot> {
        let flow = self.store.get(execution_id).await?;
        let snapshot: ExecutableFlow = flow.read().await.clone();
        self.gate
            .check(&snapshot.project_id, user, Capability::Read)
            .await?;

        let mut nodes = Vec::with_capacity(snapshot.nodes.len());
        let mut edges = Vec::new();
        for node in &snapshot.nodes {
            nodes.push(NodeSnapshot {
                id: node.id.clone(),
                level: node.level,
                status: node.status,
                start_time: node.start_time,
                end_time: node.end_time,
            });
            for out in &node.out_nodes {
                edges.push(Edge {
                    from: node.id.clone(),
                    target: out.clone(),
                });
            }
        }

        Ok(FlowSnapshot {
            nodes,
            edges,
            status: snapshot.status,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            submit_time: snapshot.submit_time,
            submit_user: snapshot.submit_user,
        })
    }

    /// Incremental snapshot: only nodes whose state moved at or after
    /// `since` (plus in-progress nodes, which are always reported). Run
    /// metadata is always included.
    pub async fn fetch_flow_update(
        &self,
        execution_id: &str,
        since: i64,
        user: &User,
    ) -> Result<FlowUpdate> {
        let flow = self.store.get(execution_id).await?;
        let snapshot: ExecutableFlow = flow.read().await.clone();
        self.gate
            .check(&snapshot.project_id, user, Capability::Read)
            .await?;

        let nodes = snapshot
            .nodes
            .iter()
            .filter(|n| n.changed_since(since))
            .map(|n| NodeUpdate {
                id: n.id.clone(),
                status: n.status,
                start_time: n.start_time,
                end_time: n.end_time,
            })
            .collect();

        Ok(FlowUpdate {
            nodes,
            status: snapshot.status,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            submit_time: snapshot.submit_time,
        })
    }

    /// Submit a new execution of `flow_id` in `project_id`. `disabled` is a
    /// partial per-node override map; unlisted nodes stay `READY`. Any
    /// failure after creation rolls the execution back, and the caller
    /// always sees the original failure, never a secondary cleanup error.
    pub async fn execute_flow(
        &self,
        project_id: &str,
        flow_id: &str,
        user: &User,
        disabled: &HashMap<String, bool>,
    ) -> Result<Submission> {
        let project = self
            .gate
            .check(project_id, user, Capability::Execute)
            .await?;

        let graph = project.flow(flow_id).ok_or_else(|| {
            ExecutorError::Project(execcore::ProjectError::FlowNotFound {
                flow: flow_id.to_string(),
                project: project_id.to_string(),
            })
        })?;

        // Unknown override keys are rejected up front, before anything is
        // created. The only client influence on the run's topology is
        // READY/DISABLED per known node.
        for node_id in disabled.keys() {
            if !graph.contains_node(node_id) {
                return Err(ExecutorError::InvalidOverride {
                    node: node_id.clone(),
                    flow: flow_id.to_string(),
                });
            }
        }

        let flow = self.store.create(&project, graph).await?;
        let execution_id = match self.apply_overrides(&flow, user, disabled).await {
            Ok(id) => id,
            Err(e) => {
                self.rollback(&flow, "override application").await;
                return Err(e);
            }
        };

        let execution_dir = match self.store.provision(&flow).await {
            Ok(dir) => dir,
            Err(e) => {
                self.rollback(&flow, "provision").await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .projects
            .copy_source_files_to(&project, &execution_dir)
            .await
        {
            self.rollback(&flow, "source copy").await;
            return Err(e);
        }

        if let Err(e) = self.store.submit(&flow).await {
            self.rollback(&flow, "submit").await;
            return Err(e);
        }

        tracing::info!(
            execution_id,
            project_id,
            flow_id,
            user = user.id,
            "execution submitted"
        );
        Ok(Submission {
            execid: execution_id,
            project: project_id.to_string(),
            flow: flow_id.to_string(),
        })
    }

    /// Stamp the submitting user and apply the per-node overrides. The
    /// keys were validated against the graph, but a store is free to hand
    /// back a flow it materialized differently, so a miss here still rolls
    /// the execution back in `execute_flow`.
    async fn apply_overrides(
        &self,
        flow: &SharedFlow,
        user: &User,
        disabled: &HashMap<String, bool>,
    ) -> Result<String> {
        let mut f = flow.write().await;
        f.submit_user = user.id.clone();
        for (node_id, is_disabled) in disabled {
            let status = if *is_disabled {
                Status::Disabled
            } else {
                Status::Ready
            };
            f.set_node_status(node_id, status)?;
        }
        Ok(f.execution_id.clone())
    }

    /// Best-effort cleanup after a failed submission step. A cleanup
    /// failure is logged and swallowed so the original error stays the one
    /// reported to the caller.
    async fn rollback(&self, flow: &SharedFlow, failed_step: &str) {
        if let Err(e) = self.store.cleanup(flow).await {
            let execution_id = flow.read().await.execution_id.clone();
            tracing::error!(execution_id, failed_step, error = %e, "rollback cleanup failed");
        }
    }
}
