mod core;
mod pipelines;
mod projects;
mod registry;

pub use self::core::{ClientOptions, GitLabClient};
pub use projects::ProjectFilter;
