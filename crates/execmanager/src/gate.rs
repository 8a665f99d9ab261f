use crate::ProjectManager;
use execcore::{Capability, Project, ProjectError, User};
use std::sync::Arc;

/// Capability check performed before every read of run state and before
/// every submission. Permissions can change between requests, so nothing
/// here is cached.
#[derive(Clone)]
pub struct PermissionGate {
    projects: Arc<dyn ProjectManager>,
}

impl PermissionGate {
    pub fn new(projects: Arc<dyn ProjectManager>) -> Self {
        Self { projects }
    }

    /// Resolve the project and verify the user holds `capability` on it.
    /// The error messages distinguish "not found" from "denied" and are
    /// surfaced verbatim to clients.
    pub async fn check(
        &self,
        project_id: &str,
        user: &User,
        capability: Capability,
    ) -> Result<Arc<Project>, ProjectError> {
        let project = self
            .projects
            .get_project(project_id)
            .await
            .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))?;

        if !project.has_permission(user, capability) {
            return Err(ProjectError::PermissionDenied {
                user: user.id.clone(),
                capability: capability.to_string(),
                project: project_id.to_string(),
            });
        }

        Ok(project)
    }
}
