use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;

use crate::auth::Token;
use crate::collector::{Collector, ErrorPolicy};
use crate::config::Config;
use crate::metrics::ExporterMetrics;
use crate::providers::gitlab::GitLabClient;
use crate::server;

#[derive(Parser, Debug)]
#[command(name = "gitlab-ci-pipelines-exporter")]
#[command(author, version, about = "Prometheus exporter for GitLab CI pipelines and container registries", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// GitLab instance base URL
    #[arg(short, long, env = "GITLAB_URL")]
    url: Option<String>,

    /// GitLab personal access token
    #[arg(short, long, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Only collect projects owned by the token's user (`--owned false` collects all)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    owned: Option<bool>,

    /// Seconds between two collection cycles
    #[arg(short, long)]
    refresh: Option<u64>,

    /// Port serving /metrics
    #[arg(short, long, env = "EXPORTER_PORT")]
    port: Option<u16>,

    #[arg(long)]
    bind_address: Option<IpAddr>,

    /// What to do when a GitLab request fails
    #[arg(long, value_enum)]
    on_error: Option<ErrorPolicy>,

    /// Keep series that were not rewritten by the last cycle
    #[arg(long)]
    no_prune: bool,

    /// Replacement for '/' in the project label
    #[arg(long)]
    label_separator: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Run a single collection cycle, print the metrics and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Write the metrics of --once to a file instead of stdout
    #[arg(short, long, requires = "once")]
    output: Option<PathBuf>,
}

/// How long the server and collector get to finish after the stop signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

impl Cli {
    /// Overlay the flags that were given on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.url {
            config.gitlab.url.clone_from(url);
        }
        if let Some(token) = &self.token {
            config.gitlab.token = Some(Token::from(token.as_str()));
        }
        if let Some(owned) = self.owned {
            config.gitlab.owned = owned;
        }
        if let Some(timeout) = self.timeout {
            config.gitlab.timeout_seconds = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.gitlab.max_retries = max_retries;
        }
        if let Some(refresh) = self.refresh {
            config.exporter.refresh_seconds = refresh;
        }
        if let Some(port) = self.port {
            config.exporter.port = port;
        }
        if let Some(bind_address) = self.bind_address {
            config.exporter.bind_address = bind_address;
        }
        if let Some(on_error) = self.on_error {
            config.exporter.on_error = on_error;
        }
        if self.no_prune {
            config.exporter.prune_stale = false;
        }
        if let Some(separator) = &self.label_separator {
            config.exporter.label_separator.clone_from(separator);
        }
    }

    fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    async fn execute_once(&self, mut collector: Collector, metrics: ExporterMetrics) -> Result<()> {
        let summary = collector.collect_once().await?;
        info!(
            "Collected {} projects ({} pipelines, {} registry repositories, {} skipped)",
            summary.projects, summary.pipelines, summary.registry_repositories, summary.skipped_projects
        );

        let text = metrics.encode_text()?;

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, text)?;
            info!("Metrics written to: {}", output_path.display());
        } else {
            print!("{text}");
        }

        Ok(())
    }

    async fn execute_exporter(&self, config: &Config, collector: Collector, metrics: ExporterMetrics) -> Result<()> {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
            Ok::<(), anyhow::Error>(())
        };

        serve_until(config.listen_addr(), collector, metrics, ctrl_c).await
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.resolve_config()?;

        if config.gitlab.token.is_none() {
            warn!("No GitLab token configured, only public projects will be collected");
        }

        info!(
            "Collecting from {} ({} projects) every {}s",
            config.gitlab.url,
            if config.gitlab.owned { "owned" } else { "all visible" },
            config.exporter.refresh_seconds
        );

        let metrics = ExporterMetrics::new()?;
        let client = GitLabClient::new(
            &config.gitlab.url,
            config.gitlab.token.clone(),
            &config.client_options(),
        )?;
        debug!("GitLab API endpoint: {}", client.api_url());
        let collector = Collector::new(client, metrics.clone(), config.collector_settings());

        if self.once {
            return self.execute_once(collector, metrics).await;
        }

        self.execute_exporter(&config, collector, metrics).await
    }
}

/// Runs the metrics server and the collector until `stop` resolves or either
/// task ends, then signals both and waits for them to finish.
async fn serve_until(
    addr: SocketAddr,
    collector: Collector,
    metrics: ExporterMetrics,
    stop: impl Future<Output = Result<()>> + Send,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_rx = shutdown_rx.clone();
    let mut server_task = tokio::spawn(server::serve(metrics, addr, async move {
        let _ = server_rx.changed().await;
    }));
    let mut collector_task = tokio::spawn(collector.run(shutdown_rx));

    let (outcome, collector_done, server_done) = tokio::select! {
        stopped = stop => (stopped, false, false),
        joined = &mut collector_task => (collector_outcome(joined), true, false),
        joined = &mut server_task => (server_outcome(joined), false, true),
    };

    let _ = shutdown_tx.send(true);

    let drain = async {
        let collector = if collector_done {
            Ok(())
        } else {
            collector_outcome((&mut collector_task).await)
        };
        let server = if server_done {
            Ok(())
        } else {
            server_outcome((&mut server_task).await)
        };
        collector.and(server)
    };

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await {
        Ok(drained) => outcome.and(drained),
        Err(_) => {
            warn!(
                "Tasks did not stop within {}s, exiting anyway",
                SHUTDOWN_TIMEOUT.as_secs()
            );
            outcome
        }
    }
}

fn collector_outcome(joined: std::result::Result<crate::error::Result<()>, JoinError>) -> Result<()> {
    joined
        .context("Collector task panicked")?
        .context("Collection failed")
}

fn server_outcome(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.context("Metrics server task panicked")?
}
