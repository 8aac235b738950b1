use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::types::{RegistryRepository, RegistryTag};

impl GitLabClient {
    /// All container registry repositories of a project.
    pub async fn list_registry_repositories(&self, project_id: u64) -> Result<Vec<RegistryRepository>> {
        self.get_all(&format!("projects/{project_id}/registry/repositories"), &[])
            .await
    }

    /// All tags of one registry repository.
    pub async fn list_registry_tags(&self, project_id: u64, repository_id: u64) -> Result<Vec<RegistryTag>> {
        self.get_all(
            &format!("projects/{project_id}/registry/repositories/{repository_id}/tags"),
            &[],
        )
        .await
    }
}
