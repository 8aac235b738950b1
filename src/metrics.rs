//! Gauge families exported on `/metrics`.

use log::debug;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::error::Result;
use crate::providers::gitlab::PipelineStatus;

pub const TIME_SINCE_LAST_RUN: &str = "gitlab_ci_pipeline_time_since_last_run_seconds";
pub const LAST_RUN_DURATION: &str = "gitlab_ci_pipeline_last_run_duration_seconds";
pub const PIPELINE_STATUS: &str = "gitlab_ci_pipeline_status";
pub const REGISTRY_TAGS: &str = "gitlab_registry_tags_total";

/// Identifies every series the collector wrote for one entity.
///
/// A pipeline key owns the time-since, duration and all tracked status series
/// of that (project, ref, id) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesKey {
    Pipeline {
        project: String,
        ref_: String,
        id: String,
    },
    RegistryTags {
        project: String,
        repository: String,
    },
}

/// Latest-pipeline values for one project.
#[derive(Debug, Clone)]
pub struct PipelineSample<'a> {
    pub project: &'a str,
    pub ref_: &'a str,
    pub id: u64,
    pub status: &'a PipelineStatus,
    pub duration_seconds: f64,
    pub seconds_since_created: f64,
}

/// Shared handle to the exporter's gauges.
///
/// Cloning is cheap; the collector writes through one clone while the scrape
/// handler reads through another.
#[derive(Clone)]
pub struct ExporterMetrics {
    inner: Arc<ExporterMetricsInner>,
}

struct ExporterMetricsInner {
    registry: Registry,
    time_since_last_run: GaugeVec,
    last_run_duration: GaugeVec,
    status: GaugeVec,
    registry_tags: GaugeVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let time_since_last_run = GaugeVec::new(
            Opts::new(
                TIME_SINCE_LAST_RUN,
                "Elapsed time since most recent GitLab CI pipeline run.",
            ),
            &["project", "ref", "id"],
        )?;
        registry.register(Box::new(time_since_last_run.clone()))?;

        let last_run_duration = GaugeVec::new(
            Opts::new(LAST_RUN_DURATION, "Duration of last pipeline run"),
            &["project", "ref", "id"],
        )?;
        registry.register(Box::new(last_run_duration.clone()))?;

        let status = GaugeVec::new(
            Opts::new(PIPELINE_STATUS, "GitLab CI pipeline current status"),
            &["project", "ref", "status", "id"],
        )?;
        registry.register(Box::new(status.clone()))?;

        let registry_tags = GaugeVec::new(
            Opts::new(REGISTRY_TAGS, "GitLab Registry Tag count"),
            &["project", "repository"],
        )?;
        registry.register(Box::new(registry_tags.clone()))?;

        Ok(Self {
            inner: Arc::new(ExporterMetricsInner {
                registry,
                time_since_last_run,
                last_run_duration,
                status,
                registry_tags,
            }),
        })
    }

    /// Snapshot of every family that currently holds at least one series.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.registry.gather()
    }

    /// Writes the pipeline series for one project's latest pipeline.
    ///
    /// Each tracked status is written explicitly: 1 for the pipeline's status,
    /// 0 for the others, so exactly one of them is set at any time. An untracked
    /// status (e.g. `canceled`) leaves all of them at 0.
    pub fn set_pipeline(&self, sample: &PipelineSample<'_>) -> SeriesKey {
        let id = sample.id.to_string();
        let labels = [sample.project, sample.ref_, id.as_str()];

        self.inner
            .last_run_duration
            .with_label_values(&labels)
            .set(sample.duration_seconds);

        for tracked in &PipelineStatus::TRACKED {
            let value = if tracked == sample.status { 1.0 } else { 0.0 };
            self.inner
                .status
                .with_label_values(&[sample.project, sample.ref_, tracked.as_str(), id.as_str()])
                .set(value);
        }

        self.inner
            .time_since_last_run
            .with_label_values(&labels)
            .set(sample.seconds_since_created);

        SeriesKey::Pipeline {
            project: sample.project.to_owned(),
            ref_: sample.ref_.to_owned(),
            id,
        }
    }

    pub fn set_registry_tags(&self, project: &str, repository: &str, tag_count: usize) -> SeriesKey {
        #[allow(clippy::cast_precision_loss)]
        let tag_count = tag_count as f64;

        self.inner
            .registry_tags
            .with_label_values(&[project, repository])
            .set(tag_count);

        SeriesKey::RegistryTags {
            project: project.to_owned(),
            repository: repository.to_owned(),
        }
    }

    /// Drops every series owned by `key`. Missing series are ignored.
    pub fn remove(&self, key: &SeriesKey) {
        match key {
            SeriesKey::Pipeline { project, ref_, id } => {
                let labels = [project.as_str(), ref_.as_str(), id.as_str()];
                let _ = self.inner.time_since_last_run.remove_label_values(&labels);
                let _ = self.inner.last_run_duration.remove_label_values(&labels);
                for tracked in &PipelineStatus::TRACKED {
                    let _ = self.inner.status.remove_label_values(&[
                        project.as_str(),
                        ref_.as_str(),
                        tracked.as_str(),
                        id.as_str(),
                    ]);
                }
            }
            SeriesKey::RegistryTags {
                project,
                repository,
            } => {
                let _ = self
                    .inner
                    .registry_tags
                    .remove_label_values(&[project.as_str(), repository.as_str()]);
            }
        }
        debug!("Removed stale series {key:?}");
    }

    /// Current registry contents in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String> {
        let metric_families = self.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Value of the series `name` carrying all of `labels`, read back from the
    /// text exposition.
    #[cfg(test)]
    pub(crate) fn sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let text = self.encode_text().ok()?;
        let prefix = format!("{name}{{");

        text.lines()
            .filter(|line| line.starts_with(&prefix))
            .find(|line| {
                labels
                    .iter()
                    .all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")))
            })
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    /// Number of series currently exported under `name`.
    #[cfg(test)]
    pub(crate) fn series_count(&self, name: &str) -> usize {
        let prefix = format!("{name}{{");
        self.encode_text()
            .map(|text| text.lines().filter(|line| line.starts_with(&prefix)).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>(status: &'a PipelineStatus) -> PipelineSample<'a> {
        PipelineSample {
            project: "team-app",
            ref_: "main",
            id: 42,
            status,
            duration_seconds: 120.0,
            seconds_since_created: 90.0,
        }
    }

    #[test]
    fn registers_all_families() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_pipeline(&sample(&PipelineStatus::Success));
        metrics.set_registry_tags("team-app", "team/app/backend", 3);

        let text = metrics.encode_text().unwrap();
        for name in [TIME_SINCE_LAST_RUN, LAST_RUN_DURATION, PIPELINE_STATUS, REGISTRY_TAGS] {
            assert!(text.contains(&format!("# TYPE {name} gauge")), "missing {name}");
        }
    }

    #[test]
    fn status_series_are_mutually_exclusive() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_pipeline(&sample(&PipelineStatus::Success));

        let status = |s: &str| {
            metrics.sample(
                PIPELINE_STATUS,
                &[("project", "team-app"), ("ref", "main"), ("id", "42"), ("status", s)],
            )
        };
        assert_eq!(status("success"), Some(1.0));
        assert_eq!(status("failed"), Some(0.0));
        assert_eq!(status("running"), Some(0.0));

        metrics.set_pipeline(&sample(&PipelineStatus::Failed));
        assert_eq!(status("success"), Some(0.0));
        assert_eq!(status("failed"), Some(1.0));
        assert_eq!(status("running"), Some(0.0));
    }

    #[test]
    fn untracked_status_zeroes_every_series() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_pipeline(&sample(&PipelineStatus::from("canceled")));

        assert_eq!(metrics.series_count(PIPELINE_STATUS), 3);
        for s in ["success", "failed", "running"] {
            assert_eq!(
                metrics.sample(PIPELINE_STATUS, &[("status", s)]),
                Some(0.0),
                "status {s} should be 0"
            );
        }
    }

    #[test]
    fn remove_clears_every_series_of_a_key() {
        let metrics = ExporterMetrics::new().unwrap();
        let pipeline = metrics.set_pipeline(&sample(&PipelineStatus::Running));
        let tags = metrics.set_registry_tags("team-app", "team/app/backend", 3);

        metrics.remove(&pipeline);
        metrics.remove(&tags);

        assert_eq!(metrics.series_count(PIPELINE_STATUS), 0);
        assert_eq!(metrics.series_count(LAST_RUN_DURATION), 0);
        assert_eq!(metrics.series_count(TIME_SINCE_LAST_RUN), 0);
        assert_eq!(metrics.series_count(REGISTRY_TAGS), 0);

        // removing twice is harmless
        metrics.remove(&pipeline);
    }

    #[test]
    fn clones_share_the_same_registry() {
        let metrics = ExporterMetrics::new().unwrap();
        let reader = metrics.clone();

        metrics.set_registry_tags("team-app", "team/app", 7);
        assert_eq!(
            reader.sample(REGISTRY_TAGS, &[("project", "team-app"), ("repository", "team/app")]),
            Some(7.0)
        );
    }
}
