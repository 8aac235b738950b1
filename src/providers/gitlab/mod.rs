mod client;
mod labels;
mod types;

pub use client::{ClientOptions, GitLabClient, ProjectFilter};
pub use labels::{project_label, validate_separator, LabelRegistry};
pub use types::{Pipeline, PipelineInfo, PipelineStatus, Project};
