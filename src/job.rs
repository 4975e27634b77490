//! Job descriptions and their lifecycle status.

use crate::scene::ViewId;
use crate::settings::ReconSettings;
use serde::{Deserialize, Serialize};

/// One unit of work: reconstruct a single view with a settings snapshot.
///
/// Built once per dispatched job and moved into the worker that runs it.
#[derive(Debug, Clone)]
pub struct JobSpec {
    view_id: ViewId,
    settings: ReconSettings,
}

impl JobSpec {
    /// Clone `template` and bind it to `view_id`.
    pub fn new(template: &ReconSettings, view_id: ViewId) -> Self {
        Self {
            view_id,
            settings: template.for_view(view_id),
        }
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn settings(&self) -> &ReconSettings {
        &self.settings
    }
}

/// Status of a job in the progress registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered, not yet picked up by a worker
    #[default]
    Queued,
    /// A worker is running the reconstruction
    Running,
    /// Reconstruction finished successfully
    Done,
    /// Reconstruction failed or its worker ended without completing
    Failed,
}

impl JobStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_overrides_view() {
        let template = ReconSettings {
            scale: 2,
            ..Default::default()
        };
        let spec = JobSpec::new(&template, 17);
        assert_eq!(spec.view_id(), 17);
        assert_eq!(spec.settings().ref_view, 17);
        assert_eq!(spec.settings().scale, 2);
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Done.is_success());
        assert!(!JobStatus::Failed.is_success());
    }

    #[test]
    fn test_job_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        assert_eq!(JobStatus::Running.to_string(), "running");
    }
}
