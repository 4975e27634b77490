//! Reconstruction collaborators.
//!
//! The orchestrator only sees two traits: a [`ReconstructorFactory`] that
//! builds one [`Reconstruction`] per job, and the reconstruction itself,
//! which runs synchronously on a worker thread and reports failure through
//! its `Result`. A panic inside `start` is treated the same as an error.

pub mod command;

pub use command::{CommandReconstructor, parse_progress};

use crate::errors::ReconError;
use crate::progress::ProgressProbe;
use crate::scene::Scene;
use crate::settings::ReconSettings;
use std::sync::Arc;

/// One in-flight reconstruction of a single view.
pub trait Reconstruction: Send {
    /// Run to completion. Blocks for as long as the reconstruction takes.
    fn start(&mut self) -> Result<(), ReconError>;

    /// Counter the reconstruction advances while it runs, if it has one.
    fn probe(&self) -> Option<ProgressProbe> {
        None
    }
}

/// Builds reconstructions from a scene and a per-view settings snapshot.
pub trait ReconstructorFactory: Send + Sync {
    fn create(
        &self,
        scene: Arc<dyn Scene>,
        settings: &ReconSettings,
    ) -> Result<Box<dyn Reconstruction>, ReconError>;
}
