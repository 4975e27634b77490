//! Typed error hierarchy for dmrecon.
//!
//! Four enums cover the subsystems:
//! - `SceneError` — loading and persisting views
//! - `ReconError` — failures raised by a single reconstruction run
//! - `JobError` — every way a dispatched job can end unsuccessfully
//! - `ConfigError` — configuration file and option problems

use crate::scene::ViewId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the scene collaborator.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Scene directory {path} does not exist")]
    NotFound { path: PathBuf },

    #[error("Scene at {path} has no views directory")]
    MissingViews { path: PathBuf },

    #[error("Failed to read scene at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("View {view_id} is out of range (scene has {count} views)")]
    ViewOutOfRange { view_id: ViewId, count: usize },

    #[error("View {view_id} is not loaded")]
    ViewAbsent { view_id: ViewId },

    #[error("Failed to serialize metadata of view {view_id}: {source}")]
    Serialize {
        view_id: ViewId,
        #[source]
        source: toml::ser::Error,
    },

    #[error("Failed to save view {view_id} to {path}: {source}")]
    Save {
        view_id: ViewId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a reconstruction run.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Failed to spawn reconstruction command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reconstruction of view {view_id} exited with code {exit_code}")]
    NonZeroExit { view_id: ViewId, exit_code: i32 },

    #[error("Failed to open reconstruction log at {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reconstruction of view {view_id} failed: {message}")]
    Failed { view_id: ViewId, message: String },

    #[error("Reconstruction I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Errors that end a single job. None of these ever abort a batch.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Recon(#[from] ReconError),

    #[error("Reconstruction of view {view_id} panicked: {message}")]
    Panicked { view_id: ViewId, message: String },

    #[error("Failed to persist view {view_id}: {source}")]
    Persist {
        view_id: ViewId,
        #[source]
        source: SceneError,
    },

    #[error("Worker for view {view_id} was lost: {message}")]
    WorkerLost { view_id: ViewId, message: String },
}

/// Errors from configuration loading and option parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid progress style '{0}'. Valid values: silent, simple, fancy")]
    InvalidProgressStyle(String),

    #[error("Invalid view list entry '{0}': expected an id or an 'a-b' range")]
    InvalidViewList(String),
}
