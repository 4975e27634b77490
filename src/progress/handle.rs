//! Scoped ownership of one job's registry entry.

use super::registry::{ProgressProbe, ProgressRegistry};
use crate::job::{JobSpec, JobStatus};
use crate::scene::ViewId;
use tracing::debug;

/// Guard binding a running job to its registry entry.
///
/// Acquiring the handle marks the job `Running`. The job leaves the registry
/// in a terminal state on every exit path:
/// - [`ProgressHandle::mark_done`] records `Done`
/// - [`ProgressHandle::fail`] records `Failed` with a reason
/// - dropping the handle without either records `Failed`, including when the
///   drop happens while the worker unwinds from a panic
///
/// The borrow of the registry keeps the handle from outliving it; the handle
/// is neither `Clone` nor meant to leave the worker that acquired it.
#[derive(Debug)]
pub struct ProgressHandle<'a> {
    registry: &'a ProgressRegistry,
    view_id: ViewId,
    finished: bool,
}

impl<'a> ProgressHandle<'a> {
    /// Register (or re-register) the job as `Running`.
    pub fn acquire(registry: &'a ProgressRegistry, spec: &JobSpec) -> Self {
        registry.begin_attempt(spec.view_id());
        debug!(view_id = spec.view_id(), "Job started");
        Self {
            registry,
            view_id: spec.view_id(),
            finished: false,
        }
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Link the in-flight reconstruction's progress counter to the registry.
    pub fn attach_probe(&self, probe: &ProgressProbe) {
        self.registry.attach_probe(self.view_id, probe);
    }

    pub fn set_progress(&self, percent: u32) {
        self.registry.set_progress(self.view_id, percent);
    }

    /// Record success. Call only after the reconstruction returned normally.
    pub fn mark_done(mut self) {
        self.registry.set_status(self.view_id, JobStatus::Done);
        self.finished = true;
        debug!(view_id = self.view_id, "Job done");
    }

    /// Record failure with the error that ended the job.
    pub fn fail(mut self, reason: &str) {
        self.registry.fail(self.view_id, reason);
        self.finished = true;
        debug!(view_id = self.view_id, reason, "Job failed");
    }
}

impl Drop for ProgressHandle<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let reason = if std::thread::panicking() {
            "reconstruction panicked"
        } else {
            "job ended without completing"
        };
        self.registry.fail(self.view_id, reason);
    }
}
