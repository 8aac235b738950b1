use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::types::{Page, Project};

/// Filters applied to `GET /projects`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    /// Include archived projects
    pub archived: bool,
    /// Request the reduced representation. It omits the registry flags, so
    /// registry collection needs this off.
    pub simple: bool,
    /// Restrict to projects owned by the token's user
    pub owned: bool,
}

impl ProjectFilter {
    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("archived", self.archived.to_string()),
            ("simple", self.simple.to_string()),
            ("owned", self.owned.to_string()),
        ]
    }
}

impl GitLabClient {
    /// Fetch one page of the project catalog visible to the token.
    pub async fn list_projects(&self, filter: &ProjectFilter, page: u32) -> Result<Page<Project>> {
        self.get_page("projects", &filter.query(), page).await
    }
}
