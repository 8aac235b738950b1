use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("GitLab API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("GitLab API error after {retries} retries (status {status})")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("GitLab rejected the access token (status {0})")]
    Unauthorized(u16),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
