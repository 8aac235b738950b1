use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Token;
use crate::collector::{CollectorSettings, ErrorPolicy};
use crate::providers::gitlab::{validate_separator, ClientOptions, ProjectFilter};

/// Configuration file structure for the exporter.
///
/// Every value has a default, so a file only needs the keys it changes.
/// Command-line flags override whatever the file sets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub gitlab: GitLabConfig,

    #[serde(default)]
    pub exporter: ExporterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab instance base URL
    #[serde(default = "default_gitlab_url")]
    pub url: String,

    /// GitLab personal access token
    pub token: Option<Token>,

    /// Only collect projects owned by the token's user
    #[serde(default)]
    pub owned: bool,

    /// Per-request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retries on rate limiting, server errors and connection failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExporterConfig {
    /// HTTP port serving `/metrics`
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Pause between two collection cycles
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,

    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Remove series that were not rewritten by the last cycle
    #[serde(default = "default_prune_stale")]
    pub prune_stale: bool,

    /// Replacement for `/` in the project label
    #[serde(default = "default_label_separator")]
    pub label_separator: String,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: default_gitlab_url(),
            token: None,
            owned: false,
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            refresh_seconds: default_refresh_seconds(),
            on_error: ErrorPolicy::default(),
            prune_stale: default_prune_stale(),
            label_separator: default_label_separator(),
        }
    }
}

fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_refresh_seconds() -> u64 {
    60
}

fn default_prune_stale() -> bool {
    true
}

fn default_label_separator() -> String {
    "-".to_string()
}

const CANDIDATES: [&str; 4] = [
    "gitlab-ci-pipelines-exporter.toml",
    "gitlab-ci-pipelines-exporter.json",
    "gitlab-ci-pipelines-exporter.yaml",
    "gitlab-ci-pipelines-exporter.yml",
];

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path (must exist)
    /// 2. ./gitlab-ci-pipelines-exporter.toml
    /// 3. ./gitlab-ci-pipelines-exporter.json
    /// 4. ./gitlab-ci-pipelines-exporter.yaml
    /// 5. ./gitlab-ci-pipelines-exporter.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        match discover(Path::new(".")) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Reject values the exporter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.exporter.refresh_seconds == 0 {
            anyhow::bail!("refresh interval must be at least one second");
        }
        if self.gitlab.timeout_seconds == 0 {
            anyhow::bail!("request timeout must be at least one second");
        }
        url::Url::parse(&self.gitlab.url)
            .with_context(|| format!("Invalid GitLab URL: {}", self.gitlab.url))?;
        validate_separator(&self.exporter.label_separator)?;
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.exporter.bind_address, self.exporter.port)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.gitlab.timeout_seconds),
            max_retries: self.gitlab.max_retries,
        }
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            filter: ProjectFilter {
                owned: self.gitlab.owned,
                ..ProjectFilter::default()
            },
            refresh: Duration::from_secs(self.exporter.refresh_seconds),
            on_error: self.exporter.on_error,
            prune_stale: self.exporter.prune_stale,
            label_separator: self.exporter.label_separator.clone(),
        }
    }
}

/// First well-known config file present in `dir`.
fn discover(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|candidate| dir.join(candidate))
        .find(|path| path.exists())
}
