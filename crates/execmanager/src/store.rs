use async_trait::async_trait;
use execcore::{ExecutableFlow, ExecutorError, FlowGraph, Project, Result, Status};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

/// Handle to a live execution. The engine mutates the flow behind the
/// write lock; readers clone a snapshot under the read lock.
pub type SharedFlow = Arc<RwLock<ExecutableFlow>>;

/// Owner of executable flows for their whole lifetime: creation, working
/// directory, scheduler hand-off, rollback.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Look up a live execution. Never fails while a run is in progress;
    /// readers see a possibly-mutating snapshot.
    async fn get(&self, execution_id: &str) -> Result<SharedFlow>;

    /// Allocate a fresh execution id and materialize all node records in
    /// `READY` state. The flow is published to the store before returning.
    async fn create(&self, project: &Project, graph: &FlowGraph) -> Result<SharedFlow>;

    /// Allocate the run's working directory and record it on the flow.
    async fn provision(&self, flow: &SharedFlow) -> Result<PathBuf>;

    /// Rollback counterpart of `provision`: release the working directory
    /// and retract the execution. Safe after partial provisioning and safe
    /// to call repeatedly.
    async fn cleanup(&self, flow: &SharedFlow) -> Result<()>;

    /// Hand the flow to the scheduler for asynchronous execution. Returns
    /// immediately; completion is observed by polling.
    async fn submit(&self, flow: &SharedFlow) -> Result<()>;
}

/// Default store: in-memory execution map plus per-execution directories
/// under a configured base dir. Submission pushes onto an unbounded queue
/// the scheduler drains.
pub struct ExecutorManager {
    executions: RwLock<HashMap<String, SharedFlow>>,
    base_dir: PathBuf,
    queue_tx: mpsc::UnboundedSender<SharedFlow>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<SharedFlow>>>,
}

impl ExecutorManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            executions: RwLock::new(HashMap::new()),
            base_dir: base_dir.into(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    /// Hand the submission queue to the scheduler. Can be taken once.
    pub async fn take_scheduler_queue(&self) -> Option<mpsc::UnboundedReceiver<SharedFlow>> {
        self.queue_rx.lock().await.take()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl ExecutionStore for ExecutorManager {
    async fn get(&self, execution_id: &str) -> Result<SharedFlow> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| ExecutorError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn create(&self, project: &Project, graph: &FlowGraph) -> Result<SharedFlow> {
        let execution_id = Uuid::new_v4().to_string();
        let flow = ExecutableFlow::from_graph(execution_id.clone(), &project.id, graph)?;
        let shared = Arc::new(RwLock::new(flow));

        self.executions
            .write()
            .await
            .insert(execution_id.clone(), shared.clone());

        tracing::debug!(execution_id, flow_id = graph.flow_id, "created execution");
        Ok(shared)
    }

    async fn provision(&self, flow: &SharedFlow) -> Result<PathBuf> {
        let execution_id = flow.read().await.execution_id.clone();
        let dir = self.base_dir.join(&execution_id);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ExecutorError::Provisioning(format!("{}: {}", dir.display(), e)))?;

        flow.write().await.execution_path = Some(dir.clone());
        tracing::debug!(execution_id, dir = %dir.display(), "provisioned execution directory");
        Ok(dir)
    }

    async fn cleanup(&self, flow: &SharedFlow) -> Result<()> {
        let (execution_id, path) = {
            let mut f = flow.write().await;
            (f.execution_id.clone(), f.execution_path.take())
        };

        if let Some(dir) = path {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                // already gone: a previous cleanup got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ExecutorError::Provisioning(format!(
                        "cleanup of {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }

        // retract the execution so a rolled-back run is never fetchable
        self.executions.write().await.remove(&execution_id);
        tracing::debug!(execution_id, "cleaned up execution");
        Ok(())
    }

    async fn submit(&self, flow: &SharedFlow) -> Result<()> {
        let execution_id = {
            let mut f = flow.write().await;
            f.status = Status::Queued;
            f.execution_id.clone()
        };

        self.queue_tx
            .send(flow.clone())
            .map_err(|_| ExecutorError::SchedulerRejection("scheduler queue closed".to_string()))?;

        tracing::info!(execution_id, "submitted execution to scheduler");
        Ok(())
    }
}
