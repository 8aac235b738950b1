use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A GitLab project as returned by `GET /projects`.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: u64,
    /// Full path including namespace (e.g., "group/subgroup/project")
    pub path_with_namespace: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub archived: bool,
    /// Legacy registry flag, still returned by most GitLab versions
    #[serde(default)]
    pub container_registry_enabled: Option<bool>,
    /// Replacement for `container_registry_enabled` since GitLab 14.9
    #[serde(default)]
    pub container_registry_access_level: Option<String>,
}

impl Project {
    /// Whether the project has its container registry switched on.
    ///
    /// Either flag may be absent depending on the GitLab version; a project
    /// reporting neither is treated as registry-disabled.
    pub fn registry_enabled(&self) -> bool {
        if let Some(enabled) = self.container_registry_enabled {
            return enabled;
        }
        matches!(
            self.container_registry_access_level.as_deref(),
            Some("enabled" | "private")
        )
    }
}

/// Pipeline status as reported by GitLab.
///
/// Only the statuses the exporter tracks get their own variant; everything
/// else GitLab may report (`canceled`, `skipped`, `manual`, ...) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum PipelineStatus {
    Success,
    Failed,
    Running,
    Other(String),
}

impl PipelineStatus {
    /// Statuses exported as `gitlab_ci_pipeline_status` series.
    pub const TRACKED: [PipelineStatus; 3] = [Self::Success, Self::Failed, Self::Running];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Running => "running",
            Self::Other(status) => status,
        }
    }
}

impl From<String> for PipelineStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "running" => Self::Running,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for PipelineStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

/// Reduced pipeline shape from `GET /projects/:id/pipelines`.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineInfo {
    pub id: u64,
    /// Read from the detail instead; kept to document the list shape
    #[serde(rename = "ref")]
    #[allow(dead_code)]
    pub ref_: String,
    pub status: PipelineStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Full pipeline from `GET /projects/:id/pipelines/:pipeline_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub status: PipelineStatus,
    /// Run time in seconds; null until the pipeline has finished
    #[serde(default)]
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryRepository {
    pub id: u64,
    /// Image path (e.g., "group/project/backend")
    pub path: String,
}

/// Only the number of tags is exported; the fields document the shape.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct RegistryTag {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Pagination state parsed from GitLab's `X-Page`, `X-Total-Pages` and
/// `X-Next-Page` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u32,
    /// Omitted by GitLab for collections above 10,000 items
    pub total_pages: Option<u32>,
    pub next_page: Option<u32>,
}

impl PageInfo {
    /// Page to request after this one, or `None` once the last page was read.
    pub fn next(&self) -> Option<u32> {
        if let Some(total) = self.total_pages {
            if self.page >= total {
                return None;
            }
        }
        self.next_page.filter(|next| *next > self.page)
    }
}

/// One page of a paginated list endpoint.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub info: PageInfo,
}
