//! Per-view reconstruction settings.
//!
//! A [`ReconSettings`] value is the configuration snapshot handed to a
//! reconstruction. The orchestrator clones one template per job and only
//! overrides [`ReconSettings::ref_view`].

use crate::scene::ViewId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconSettings {
    /// View being reconstructed (set per job, never read from config)
    #[serde(skip)]
    pub ref_view: ViewId,
    /// Image pyramid level (0 is original size)
    pub scale: u32,
    /// Neighbor count for global view selection
    pub global_vs_max: usize,
    /// Patch size for NCC based comparison
    pub filter_width: u32,
    pub use_color_scale: bool,
    /// Image embedding the reconstruction reads
    pub image_embedding: String,
    /// Store the dz map into the view
    pub keep_dz_map: bool,
    /// Store the confidence map into the view
    pub keep_confidence_map: bool,
    pub write_ply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ply_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Suppress the reconstruction's own console output
    pub quiet: bool,
}

impl Default for ReconSettings {
    fn default() -> Self {
        Self {
            ref_view: 0,
            scale: 0,
            global_vs_max: 4,
            filter_width: 5,
            use_color_scale: true,
            image_embedding: "undistorted".to_string(),
            keep_dz_map: false,
            keep_confidence_map: false,
            write_ply: false,
            ply_path: None,
            log_path: None,
            quiet: false,
        }
    }
}

impl ReconSettings {
    /// Name of the embedding a finished reconstruction attaches to its view.
    pub fn target_embedding(&self) -> String {
        format!("depth-L{}", self.scale)
    }

    /// Clone these settings for a single view.
    pub fn for_view(&self, view_id: ViewId) -> Self {
        Self {
            ref_view: view_id,
            ..self.clone()
        }
    }
}
