//! Directory-backed scene.
//!
//! Layout:
//!
//! ```text
//! <scene>/views/<name>/meta.toml
//! ```
//!
//! Views are indexed by the sorted order of their directory names. Each
//! `meta.toml` carries `camera_valid` and the list of `embeddings`. A view
//! directory without readable metadata is kept as an empty slot so that
//! indices stay stable.

use super::{Scene, ViewId, ViewInfo};
use crate::errors::SceneError;
use crate::util::lock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Name of the directory holding one subdirectory per view.
pub const VIEWS_DIR: &str = "views";
/// Per-view metadata file.
pub const META_FILE: &str = "meta.toml";

#[derive(Debug)]
struct ViewState {
    info: ViewInfo,
    dirty: bool,
}

#[derive(Debug)]
struct ViewSlot {
    dir: PathBuf,
    state: Mutex<Option<ViewState>>,
}

/// A scene loaded from a directory tree.
///
/// Every view slot has its own lock, so distinct views can be saved from
/// different worker threads at the same time.
#[derive(Debug)]
pub struct FsScene {
    root: PathBuf,
    views: Vec<ViewSlot>,
}

impl FsScene {
    /// Load the scene rooted at `root`.
    ///
    /// Fails when the directory or its `views/` subdirectory is missing or
    /// unreadable. Individual unreadable views do not fail the load.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, SceneError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(SceneError::NotFound { path: root });
        }

        let views_dir = root.join(VIEWS_DIR);
        if !views_dir.is_dir() {
            return Err(SceneError::MissingViews { path: root });
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&views_dir)
            .map_err(|source| SceneError::Read {
                path: views_dir.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let views = dirs
            .into_iter()
            .map(|dir| {
                let state = read_meta(&dir).map(|info| ViewState { info, dirty: false });
                ViewSlot {
                    dir,
                    state: Mutex::new(state),
                }
            })
            .collect::<Vec<_>>();

        debug!(root = %root.display(), views = views.len(), "Loaded scene");
        Ok(Self { root, views })
    }

    /// Root directory of the scene.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, id: ViewId) -> Result<&ViewSlot, SceneError> {
        self.views.get(id).ok_or(SceneError::ViewOutOfRange {
            view_id: id,
            count: self.views.len(),
        })
    }

    fn write_slot(id: ViewId, slot: &ViewSlot, state: &mut ViewState) -> Result<(), SceneError> {
        let content = toml::to_string_pretty(&state.info)
            .map_err(|source| SceneError::Serialize { view_id: id, source })?;
        let path = slot.dir.join(META_FILE);
        fs::write(&path, content).map_err(|source| SceneError::Save {
            view_id: id,
            path,
            source,
        })?;
        state.dirty = false;
        Ok(())
    }
}

fn read_meta(dir: &Path) -> Option<ViewInfo> {
    let path = dir.join(META_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            debug!(path = %path.display(), "View has no metadata, treating as absent");
            return None;
        }
    };
    match toml::from_str(&content) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable view metadata");
            None
        }
    }
}

impl Scene for FsScene {
    fn view_count(&self) -> usize {
        self.views.len()
    }

    fn view(&self, id: ViewId) -> Option<ViewInfo> {
        let slot = self.views.get(id)?;
        lock(&slot.state).as_ref().map(|state| state.info.clone())
    }

    fn attach_embedding(&self, id: ViewId, name: &str) -> Result<(), SceneError> {
        let slot = self.slot(id)?;
        let mut guard = lock(&slot.state);
        let state = guard
            .as_mut()
            .ok_or(SceneError::ViewAbsent { view_id: id })?;
        if !state.info.has_embedding(name) {
            state.info.embeddings.push(name.to_string());
            state.dirty = true;
        }
        Ok(())
    }

    fn save_view(&self, id: ViewId) -> Result<(), SceneError> {
        let slot = self.slot(id)?;
        let mut guard = lock(&slot.state);
        let state = guard
            .as_mut()
            .ok_or(SceneError::ViewAbsent { view_id: id })?;
        Self::write_slot(id, slot, state)
    }

    fn save_views(&self) -> Result<(), SceneError> {
        let mut first_error = None;
        for (id, slot) in self.views.iter().enumerate() {
            let mut guard = lock(&slot.state);
            let Some(state) = guard.as_mut() else {
                continue;
            };
            if !state.dirty {
                continue;
            }
            if let Err(e) = Self::write_slot(id, slot, state) {
                warn!(view_id = id, error = %e, "Failed to save view");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
