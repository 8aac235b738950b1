//! Polling loop that turns GitLab state into gauge values.
//!
//! Every cycle walks the whole project catalog and rewrites the series it
//! finds. Series written in the previous cycle and not rewritten in this one
//! are pruned, so the registry always reflects the last full snapshot.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::Result;
use crate::metrics::{ExporterMetrics, PipelineSample, SeriesKey};
use crate::providers::gitlab::{
    project_label, GitLabClient, LabelRegistry, Pipeline, PipelineInfo, Project, ProjectFilter,
};

/// What to do when fetching data from GitLab fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log the failure and keep the affected project's previous values
    #[default]
    Skip,
    /// Stop the collector with the error
    Fatal,
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub filter: ProjectFilter,
    pub refresh: Duration,
    pub on_error: ErrorPolicy,
    pub prune_stale: bool,
    pub label_separator: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            filter: ProjectFilter::default(),
            refresh: Duration::from_secs(60),
            on_error: ErrorPolicy::default(),
            prune_stale: true,
            label_separator: "-".to_string(),
        }
    }
}

/// Counters describing one finished collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub pages: u32,
    pub projects: usize,
    pub pipelines: usize,
    pub registry_repositories: usize,
    pub skipped_projects: usize,
    pub pruned_series: usize,
}

/// Everything fetched for one project, published only once complete.
struct ProjectSnapshot {
    /// Latest pipeline and the instant its detail was fetched
    pipeline: Option<(Pipeline, DateTime<Utc>)>,
    registry: Vec<(String, usize)>,
}

pub struct Collector {
    client: GitLabClient,
    metrics: ExporterMetrics,
    settings: CollectorSettings,
    /// Series written by the last cycle that ran to completion, with the id
    /// of the project that wrote them
    previous: HashMap<SeriesKey, u64>,
}

impl Collector {
    pub fn new(client: GitLabClient, metrics: ExporterMetrics, settings: CollectorSettings) -> Self {
        Self {
            client,
            metrics,
            settings,
            previous: HashMap::new(),
        }
    }

    /// Runs one full collection cycle against the system clock.
    pub async fn collect_once(&mut self) -> Result<CycleSummary> {
        self.collect_at(Utc::now).await
    }

    /// Runs one full collection cycle.
    ///
    /// `clock` is read once per project, right after its pipeline detail was
    /// fetched, and pipeline age is measured against that instant.
    ///
    /// # Errors
    ///
    /// Returns the first error when listing projects fails, or when any fetch
    /// fails under [`ErrorPolicy::Fatal`]. Series from an abandoned cycle are
    /// kept and only pruned after the next complete cycle.
    pub async fn collect_at<F>(&mut self, clock: F) -> Result<CycleSummary>
    where
        F: Fn() -> DateTime<Utc> + Sync,
    {
        let mut current = HashMap::new();
        let mut summary = CycleSummary::default();

        if let Err(e) = self.walk_projects(&clock, &mut current, &mut summary).await {
            self.previous.extend(current);
            return Err(e);
        }

        if self.settings.prune_stale {
            for stale in self.previous.keys().filter(|key| !current.contains_key(*key)) {
                self.metrics.remove(stale);
                summary.pruned_series += 1;
            }
        }
        self.previous = current;

        Ok(summary)
    }

    async fn walk_projects(
        &self,
        clock: &(dyn Fn() -> DateTime<Utc> + Sync),
        current: &mut HashMap<SeriesKey, u64>,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        let mut labels = LabelRegistry::default();
        let mut page = 1;

        loop {
            let projects = self.client.list_projects(&self.settings.filter, page).await?;
            summary.pages += 1;

            for project in &projects.items {
                let label = project_label(&project.path_with_namespace, &self.settings.label_separator);
                if let Some(owner) = labels.claim(&label, &project.path_with_namespace) {
                    warn!(
                        "Projects {owner} and {} share the label value {label:?}; choose another label separator",
                        project.path_with_namespace
                    );
                }
                summary.projects += 1;

                match self.fetch_project(project, clock).await {
                    Ok(snapshot) => {
                        self.publish(project.id, &label, snapshot, current, summary);
                    }
                    Err(e) if self.settings.on_error == ErrorPolicy::Fatal => return Err(e),
                    Err(e) => {
                        warn!(
                            "Skipping project {} this cycle: {e}",
                            project.path_with_namespace
                        );
                        summary.skipped_projects += 1;
                        current.extend(
                            self.previous
                                .iter()
                                .filter(|(_, owner)| **owner == project.id)
                                .map(|(key, owner)| (key.clone(), *owner)),
                        );
                    }
                }
            }

            match projects.info.next() {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(())
    }

    async fn fetch_project(
        &self,
        project: &Project,
        clock: &(dyn Fn() -> DateTime<Utc> + Sync),
    ) -> Result<ProjectSnapshot> {
        debug!("Collecting project {} ({})", project.path_with_namespace, project.id);

        let pipelines = self.client.list_pipelines(project.id).await?;
        let pipeline = match latest_pipeline(&pipelines) {
            Some(latest) => {
                let detail = self.client.get_pipeline(project.id, latest.id).await?;
                Some((detail, clock()))
            }
            None => None,
        };

        let mut registry = Vec::new();
        if project.registry_enabled() {
            for repository in self.client.list_registry_repositories(project.id).await? {
                let tags = self
                    .client
                    .list_registry_tags(project.id, repository.id)
                    .await?;
                registry.push((repository.path, tags.len()));
            }
        }

        Ok(ProjectSnapshot { pipeline, registry })
    }

    fn publish(
        &self,
        project_id: u64,
        label: &str,
        snapshot: ProjectSnapshot,
        current: &mut HashMap<SeriesKey, u64>,
        summary: &mut CycleSummary,
    ) {
        if let Some((pipeline, fetched_at)) = snapshot.pipeline {
            let key = self.metrics.set_pipeline(&PipelineSample {
                project: label,
                ref_: &pipeline.ref_,
                id: pipeline.id,
                status: &pipeline.status,
                duration_seconds: pipeline.duration.unwrap_or(0.0),
                seconds_since_created: seconds_since(pipeline.created_at, fetched_at),
            });
            current.insert(key, project_id);
            summary.pipelines += 1;
        }

        for (repository, tag_count) in snapshot.registry {
            let key = self.metrics.set_registry_tags(label, &repository, tag_count);
            current.insert(key, project_id);
            summary.registry_repositories += 1;
        }
    }

    /// Collects every `refresh` interval until `shutdown` changes or its
    /// sender is dropped.
    ///
    /// # Errors
    ///
    /// Under [`ErrorPolicy::Fatal`] the first failed cycle ends the loop with
    /// its error. Under [`ErrorPolicy::Skip`] failed cycles are logged and
    /// retried on the next tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Collector started, refreshing every {}s",
            self.settings.refresh.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.collect_once() => outcome,
                _ = shutdown.changed() => break,
            };

            match outcome {
                Ok(summary) => info!(
                    "Collected {} projects on {} pages: {} pipelines, {} registry repositories, {} skipped, {} stale series pruned",
                    summary.projects,
                    summary.pages,
                    summary.pipelines,
                    summary.registry_repositories,
                    summary.skipped_projects,
                    summary.pruned_series
                ),
                Err(e) if self.settings.on_error == ErrorPolicy::Fatal => return Err(e),
                Err(e) => error!("Collection cycle abandoned: {e}"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.refresh) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Collector stopped");
        Ok(())
    }
}

/// Picks the most recently created pipeline, without trusting the API order.
fn latest_pipeline(pipelines: &[PipelineInfo]) -> Option<&PipelineInfo> {
    pipelines
        .iter()
        .max_by_key(|pipeline| (pipeline.created_at, pipeline.id))
}

/// Whole seconds between `created_at` and `now`, never negative.
fn seconds_since(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = now.signed_duration_since(created_at).num_milliseconds() as f64;
    (millis / 1000.0).round().max(0.0)
}
