//! Thread-safe registry of job statuses.
//!
//! Workers write their own entry (one writer per view id); the rendering loop
//! reads everything through [`ProgressRegistry::snapshot`]. Every operation
//! holds the lock only long enough to read or copy entries.

use crate::job::JobStatus;
use crate::scene::ViewId;
use crate::util::lock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared percent counter a running reconstruction updates in place.
///
/// The registry only keeps a weak link to it, so a finished reconstruction
/// releasing its probe never leaves a dangling reader.
#[derive(Debug, Clone, Default)]
pub struct ProgressProbe(Arc<AtomicU32>);

impl ProgressProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the percentage, clamped to 100.
    pub fn set(&self, percent: u32) {
        self.0.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    fn downgrade(&self) -> Weak<AtomicU32> {
        Arc::downgrade(&self.0)
    }
}

#[derive(Debug, Default)]
struct RegistryEntry {
    status: JobStatus,
    progress: u32,
    probe: Option<Weak<AtomicU32>>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

impl RegistryEntry {
    fn current_progress(&self) -> u32 {
        if self.status == JobStatus::Running
            && let Some(probe) = self.probe.as_ref().and_then(Weak::upgrade)
        {
            return probe.load(Ordering::Relaxed).max(self.progress);
        }
        self.progress
    }

    fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        Some(match self.finished_at {
            Some(finished) => finished.saturating_duration_since(started),
            None => started.elapsed(),
        })
    }
}

/// Point-in-time copy of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub view_id: ViewId,
    pub status: JobStatus,
    /// Percent complete (0..=100)
    pub progress: u32,
    /// Time spent running so far, or total run time once finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Number of registered jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.done + self.failed
    }

    /// Jobs in a terminal status.
    pub fn finished(&self) -> usize {
        self.done + self.failed
    }

    fn from_snapshot(snapshot: &[JobSnapshot]) -> Self {
        snapshot.iter().fold(Self::default(), |mut counts, job| {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
                JobStatus::Failed => counts.failed += 1,
            }
            counts
        })
    }
}

/// Registry mapping view ids to job status and progress.
///
/// Constructed by the driver and shared as `Arc<ProgressRegistry>` between the
/// orchestrator, its workers and the progress reporter.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    entries: Mutex<BTreeMap<ViewId, RegistryEntry>>,
    total_views: AtomicUsize,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the number of views in the scene, for display.
    pub fn set_total_views(&self, count: usize) {
        self.total_views.store(count, Ordering::Relaxed);
    }

    pub fn total_views(&self) -> usize {
        self.total_views.load(Ordering::Relaxed)
    }

    /// Pre-declare a job as `Queued`. Returns `false` if it was already known.
    pub fn register_job(&self, view_id: ViewId) -> bool {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&view_id) {
            return false;
        }
        entries.insert(view_id, RegistryEntry::default());
        true
    }

    /// Pre-declare several jobs. Returns how many were new.
    pub fn register_jobs(&self, view_ids: impl IntoIterator<Item = ViewId>) -> usize {
        let mut entries = lock(&self.entries);
        let mut added = 0;
        for view_id in view_ids {
            if !entries.contains_key(&view_id) {
                entries.insert(view_id, RegistryEntry::default());
                added += 1;
            }
        }
        added
    }

    /// Set the status of a job, registering it if needed.
    ///
    /// Terminal statuses are final: returns `false` and leaves the entry
    /// untouched when the job already finished.
    pub fn set_status(&self, view_id: ViewId, status: JobStatus) -> bool {
        self.transition(view_id, status, None)
    }

    /// Mark a job `Failed` with a reason.
    pub fn fail(&self, view_id: ViewId, reason: impl Into<String>) -> bool {
        self.transition(view_id, JobStatus::Failed, Some(reason.into()))
    }

    fn transition(&self, view_id: ViewId, status: JobStatus, error: Option<String>) -> bool {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(view_id).or_default();
        if entry.status.is_terminal() {
            debug!(view_id, from = %entry.status, to = %status, "Ignoring status change of finished job");
            return false;
        }

        match status {
            JobStatus::Queued => {}
            JobStatus::Running => {
                entry.started_at.get_or_insert_with(Instant::now);
            }
            JobStatus::Done | JobStatus::Failed => {
                entry.progress = entry.current_progress();
                if status == JobStatus::Done {
                    entry.progress = 100;
                }
                entry.probe = None;
                entry.finished_at = Some(Instant::now());
            }
        }
        entry.status = status;
        if error.is_some() {
            entry.error = error;
        }
        true
    }

    /// Start a new attempt for a job: the entry becomes `Running` with its
    /// progress, error and probe cleared. This is the only way a finished
    /// entry is reopened.
    pub(crate) fn begin_attempt(&self, view_id: ViewId) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(view_id).or_default();
        *entry = RegistryEntry {
            status: JobStatus::Running,
            started_at: Some(Instant::now()),
            ..Default::default()
        };
    }

    pub(crate) fn attach_probe(&self, view_id: ViewId, probe: &ProgressProbe) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&view_id)
            && !entry.status.is_terminal()
        {
            entry.probe = Some(probe.downgrade());
        }
    }

    /// Update the progress of a running or queued job (clamped to 100).
    pub fn set_progress(&self, view_id: ViewId, percent: u32) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&view_id)
            && !entry.status.is_terminal()
        {
            entry.progress = percent.min(100);
        }
    }

    pub fn status(&self, view_id: ViewId) -> Option<JobStatus> {
        lock(&self.entries).get(&view_id).map(|entry| entry.status)
    }

    /// Copy all entries, ordered by view id.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let entries = lock(&self.entries);
        entries
            .iter()
            .map(|(&view_id, entry)| JobSnapshot {
                view_id,
                status: entry.status,
                progress: entry.current_progress(),
                elapsed_ms: entry.elapsed().map(|d| d.as_millis() as u64),
                error: entry.error.clone(),
            })
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_snapshot(&self.snapshot())
    }

    /// Views whose job ended `Failed`; these are the ones to re-run.
    pub fn failed_views(&self) -> Vec<ViewId> {
        lock(&self.entries)
            .iter()
            .filter(|(_, entry)| entry.status == JobStatus::Failed)
            .map(|(&view_id, _)| view_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
