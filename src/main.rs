mod auth;
mod cli;
mod collector;
mod config;
mod error;
mod metrics;
mod providers;
mod server;

use clap::Parser;
use cli::Cli;
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting gitlab-ci-pipelines-exporter {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli.execute().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
