use async_trait::async_trait;
use execcore::{ExecutorError, Project, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resolves projects and copies their versioned source files into a run's
/// working directory.
#[async_trait]
pub trait ProjectManager: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Option<Arc<Project>>;

    /// Copy the project's current source files into `dir`. The directory is
    /// exclusively owned by one execution; nothing here is shared.
    async fn copy_source_files_to(&self, project: &Project, dir: &Path) -> Result<()>;
}

/// In-memory project registry, optionally loaded from a directory of JSON
/// project definitions at startup.
#[derive(Default)]
pub struct LocalProjectManager {
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl LocalProjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), Arc::new(project));
    }

    /// Load every `*.json` project definition under `dir`. Each flow graph
    /// is validated before the project becomes visible.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension() != Some("json".as_ref()) {
                continue;
            }

            let raw = tokio::fs::read_to_string(&path).await?;
            let project: Project = serde_json::from_str(&raw).map_err(|e| {
                ExecutorError::Provisioning(format!(
                    "invalid project definition {}: {}",
                    path.display(),
                    e
                ))
            })?;
            for graph in project.flows.values() {
                graph.validate()?;
            }

            tracing::info!(project_id = project.id, file = %path.display(), "loaded project");
            self.insert(project).await;
            loaded += 1;
        }

        Ok(loaded)
    }
}

#[async_trait]
impl ProjectManager for LocalProjectManager {
    async fn get_project(&self, project_id: &str) -> Option<Arc<Project>> {
        self.projects.read().await.get(project_id).cloned()
    }

    async fn copy_source_files_to(&self, project: &Project, dir: &Path) -> Result<()> {
        let Some(source_dir) = &project.source_dir else {
            return Ok(());
        };

        let source = source_dir.clone();
        let target = dir.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| ExecutorError::SourceCopy(format!("copy task failed: {}", e)))?
            .map_err(|e| ExecutorError::SourceCopy(e.to_string()))?;

        tracing::debug!(project_id = project.id, copied, dir = %dir.display(), "copied source files");
        Ok(())
    }
}

fn copy_tree(source: &Path, target: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    std::fs::create_dir_all(target)?;

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use execcore::FlowGraph;

    #[tokio::test]
    async fn copy_source_files_replicates_the_tree() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("job.properties"), "type=command").unwrap();
        std::fs::create_dir(source.path().join("lib")).unwrap();
        std::fs::write(source.path().join("lib/dep.jar"), "jar").unwrap();

        let mut project = Project::new("p1");
        project.source_dir = Some(source.path().to_path_buf());

        let target = tempfile::tempdir().unwrap();
        let manager = LocalProjectManager::new();
        manager
            .copy_source_files_to(&project, target.path())
            .await
            .unwrap();

        assert!(target.path().join("job.properties").is_file());
        assert!(target.path().join("lib/dep.jar").is_file());
    }

    #[tokio::test]
    async fn copy_fails_when_source_is_missing() {
        let mut project = Project::new("p1");
        project.source_dir = Some("/nonexistent/project/source".into());

        let target = tempfile::tempdir().unwrap();
        let manager = LocalProjectManager::new();
        let err = manager
            .copy_source_files_to(&project, target.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::SourceCopy(_)));
    }

    #[tokio::test]
    async fn load_dir_validates_flow_graphs() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new("p1");
        let mut graph = FlowGraph::new("f1");
        graph.add_node("a").add_node("b");
        graph.add_edge("a", "b").add_edge("b", "a");
        project.add_flow(graph);
        std::fs::write(
            dir.path().join("p1.json"),
            serde_json::to_string(&project).unwrap(),
        )
        .unwrap();

        let manager = LocalProjectManager::new();
        assert!(manager.load_dir(dir.path()).await.is_err());
        assert!(manager.get_project("p1").await.is_none());
    }
}
