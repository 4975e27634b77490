//! Outcome tracking for a batch run.
//!
//! [`JobOutcome`] records how one job ended, [`BatchSummary`] aggregates a
//! whole batch, and [`StatusReport`] is the JSON document written next to the
//! reconstruction logs once the run is over.

use super::selection::SkippedView;
use crate::job::JobStatus;
use crate::progress::JobSnapshot;
use crate::scene::ViewId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of executing a single job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub view_id: ViewId,
    /// Final status, always terminal
    pub status: JobStatus,
    /// Error message if the reconstruction failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error message if saving the finished view failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl JobOutcome {
    pub fn success(view_id: ViewId, duration: Duration) -> Self {
        Self {
            view_id,
            status: JobStatus::Done,
            error: None,
            persist_error: None,
            duration,
        }
    }

    pub fn failure(view_id: ViewId, error: &impl std::fmt::Display, duration: Duration) -> Self {
        Self {
            view_id,
            status: JobStatus::Failed,
            error: Some(error.to_string()),
            persist_error: None,
            duration,
        }
    }

    /// Record a persistence failure. The job itself stays `Done`.
    pub fn with_persist_error(mut self, error: &impl std::fmt::Display) -> Self {
        self.persist_error = Some(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Jobs dispatched
    pub total_jobs: usize,
    pub done: usize,
    pub failed: usize,
    /// Done jobs whose view could not be saved
    pub persist_failures: usize,
    /// Views left out at selection time
    pub skipped: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchSummary {
    pub fn new(total_jobs: usize) -> Self {
        Self {
            total_jobs,
            ..Default::default()
        }
    }

    /// Summary of a single reconstruction, timed by its own outcome.
    pub fn single(outcome: JobOutcome) -> Self {
        let mut summary = Self::new(1);
        summary.duration = outcome.duration;
        summary.add_outcome(outcome);
        summary
    }

    pub fn add_outcome(&mut self, outcome: JobOutcome) {
        if outcome.is_success() {
            self.done += 1;
        } else {
            self.failed += 1;
        }
        if outcome.persist_error.is_some() {
            self.persist_failures += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn record_skipped(&mut self, skipped: &[SkippedView]) {
        self.skipped = skipped.len();
    }

    /// Check if every dispatched job succeeded and was saved.
    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.persist_failures == 0 && self.done == self.total_jobs
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total_jobs == 0 {
            return 100.0;
        }
        (self.done as f64 / self.total_jobs as f64) * 100.0
    }

    /// Failed view ids in ascending order, without duplicates.
    pub fn failed_views(&self) -> Vec<ViewId> {
        let mut views: Vec<ViewId> = self
            .outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.view_id)
            .collect();
        views.sort_unstable();
        views.dedup();
        views
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// File name of the status report inside the log directory.
pub const STATUS_FILE: &str = "dmrecon-status.json";

/// JSON report of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scene: PathBuf,
    pub summary: BatchSummary,
    /// Final registry snapshot
    pub jobs: Vec<JobSnapshot>,
    pub skipped: Vec<SkippedView>,
}

impl StatusReport {
    pub fn new(
        scene: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        summary: BatchSummary,
        jobs: Vec<JobSnapshot>,
        skipped: Vec<SkippedView>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            scene: scene.into(),
            summary,
            jobs,
            skipped,
        }
    }

    /// Write the report as pretty JSON, creating the parent directory.
    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize status report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write status report to {}", path.display()))?;
        Ok(())
    }
}

/// Durations as milliseconds.
mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }
}
