//! Scene collaborator: an index-addressable set of views.
//!
//! The orchestrator only needs a handful of queries from a scene: how many
//! views exist, whether a view is present with a valid camera, which named
//! embeddings it carries, and how to persist it. [`Scene`] captures exactly
//! that; [`FsScene`] is the directory-backed implementation used by the
//! `dmrecon` binary.

mod fs;

pub use fs::FsScene;

use crate::errors::SceneError;
use serde::{Deserialize, Serialize};

/// Index of a view within its scene.
pub type ViewId = usize;

/// Snapshot of the per-view facts the orchestrator filters on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewInfo {
    /// Whether the view's camera calibration is usable
    #[serde(default)]
    pub camera_valid: bool,
    /// Names of the embeddings attached to the view
    #[serde(default)]
    pub embeddings: Vec<String>,
}

impl ViewInfo {
    /// Create a view with a valid camera and the given embeddings.
    pub fn with_embeddings<I, S>(embeddings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            camera_valid: true,
            embeddings: embeddings.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_camera_valid(&self) -> bool {
        self.camera_valid
    }

    pub fn has_embedding(&self, name: &str) -> bool {
        self.embeddings.iter().any(|e| e == name)
    }
}

/// A multi-view scene the orchestrator reads from and persists into.
///
/// Implementations must be shareable across worker threads. Mutations of
/// distinct views may happen concurrently; an implementation that cannot
/// save distinct views in parallel reports so via
/// [`Scene::supports_concurrent_saves`] and the orchestrator serializes its
/// save calls.
pub trait Scene: Send + Sync {
    /// Number of view slots, including absent ones.
    fn view_count(&self) -> usize;

    /// The view at `id`, or `None` when the slot is out of range or empty.
    fn view(&self, id: ViewId) -> Option<ViewInfo>;

    /// Record that a named embedding now exists for a view.
    fn attach_embedding(&self, id: ViewId, name: &str) -> Result<(), SceneError>;

    /// Persist a single view.
    fn save_view(&self, id: ViewId) -> Result<(), SceneError>;

    /// Persist every modified view.
    fn save_views(&self) -> Result<(), SceneError>;

    fn supports_concurrent_saves(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory scene for unit tests.

    use super::*;
    use crate::util::lock;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub struct MemoryScene {
        views: Mutex<Vec<Option<ViewInfo>>>,
        saved: Mutex<Vec<ViewId>>,
        failing_saves: HashSet<ViewId>,
        concurrent_saves: bool,
        active_saves: AtomicUsize,
        peak_saves: AtomicUsize,
        save_delay: Duration,
    }

    impl MemoryScene {
        pub fn new(views: Vec<Option<ViewInfo>>) -> Self {
            Self {
                views: Mutex::new(views),
                concurrent_saves: true,
                ..Default::default()
            }
        }

        /// A scene of `count` valid views without embeddings.
        pub fn valid(count: usize) -> Self {
            Self::new(vec![Some(ViewInfo::with_embeddings(Vec::<String>::new())); count])
        }

        pub fn with_failing_saves(mut self, ids: impl IntoIterator<Item = ViewId>) -> Self {
            self.failing_saves = ids.into_iter().collect();
            self
        }

        pub fn serial_saves(mut self, delay: Duration) -> Self {
            self.concurrent_saves = false;
            self.save_delay = delay;
            self
        }

        pub fn saved(&self) -> Vec<ViewId> {
            let mut saved = lock(&self.saved).clone();
            saved.sort_unstable();
            saved
        }

        pub fn peak_concurrent_saves(&self) -> usize {
            self.peak_saves.load(Ordering::SeqCst)
        }
    }

    impl Scene for MemoryScene {
        fn view_count(&self) -> usize {
            lock(&self.views).len()
        }

        fn view(&self, id: ViewId) -> Option<ViewInfo> {
            lock(&self.views).get(id).cloned().flatten()
        }

        fn attach_embedding(&self, id: ViewId, name: &str) -> Result<(), SceneError> {
            let mut views = lock(&self.views);
            let count = views.len();
            let view = views
                .get_mut(id)
                .ok_or(SceneError::ViewOutOfRange { view_id: id, count })?
                .as_mut()
                .ok_or(SceneError::ViewAbsent { view_id: id })?;
            if !view.has_embedding(name) {
                view.embeddings.push(name.to_string());
            }
            Ok(())
        }

        fn save_view(&self, id: ViewId) -> Result<(), SceneError> {
            let active = self.active_saves.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_saves.fetch_max(active, Ordering::SeqCst);
            if !self.save_delay.is_zero() {
                std::thread::sleep(self.save_delay);
            }
            self.active_saves.fetch_sub(1, Ordering::SeqCst);

            if self.failing_saves.contains(&id) {
                return Err(SceneError::Save {
                    view_id: id,
                    path: format!("memory://{id}").into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            lock(&self.saved).push(id);
            Ok(())
        }

        fn save_views(&self) -> Result<(), SceneError> {
            Ok(())
        }

        fn supports_concurrent_saves(&self) -> bool {
            self.concurrent_saves
        }
    }
}
