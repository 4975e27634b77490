//! Candidate view selection.
//!
//! Skipped views are never errors and never enter the progress registry.

use crate::scene::{Scene, ViewId};
use serde::Serialize;
use tracing::{debug, warn};

/// Why a view did not become a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Id beyond the scene's view count
    OutOfRange,
    /// Slot exists but holds no view
    Absent,
    InvalidCamera,
    /// Target embedding present and the run is not forced
    AlreadyReconstructed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::OutOfRange => write!(f, "out of range"),
            SkipReason::Absent => write!(f, "no view data"),
            SkipReason::InvalidCamera => write!(f, "invalid camera"),
            SkipReason::AlreadyReconstructed => write!(f, "already reconstructed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkippedView {
    pub view_id: ViewId,
    pub reason: SkipReason,
}

/// Result of selection: the jobs to run and the views left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub candidates: Vec<ViewId>,
    pub skipped: Vec<SkippedView>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|s| s.reason == reason).count()
    }
}

/// Decide whether a single view should be reconstructed.
pub fn check_view(
    scene: &dyn Scene,
    view_id: ViewId,
    force: bool,
    target_embedding: &str,
) -> Result<(), SkipReason> {
    if view_id >= scene.view_count() {
        return Err(SkipReason::OutOfRange);
    }
    let view = scene.view(view_id).ok_or(SkipReason::Absent)?;
    if !view.is_camera_valid() {
        return Err(SkipReason::InvalidCamera);
    }
    if !force && view.has_embedding(target_embedding) {
        return Err(SkipReason::AlreadyReconstructed);
    }
    Ok(())
}

/// Build the batch for `explicit_ids`, or for every view when it is empty.
///
/// Explicit ids keep their order, duplicates included.
pub fn plan_batch(
    scene: &dyn Scene,
    explicit_ids: &[ViewId],
    force: bool,
    target_embedding: &str,
) -> BatchPlan {
    let ids: Vec<ViewId> = if explicit_ids.is_empty() {
        (0..scene.view_count()).collect()
    } else {
        explicit_ids.to_vec()
    };

    let mut plan = BatchPlan::default();
    for view_id in ids {
        match check_view(scene, view_id, force, target_embedding) {
            Ok(()) => plan.candidates.push(view_id),
            Err(reason) => {
                if reason == SkipReason::OutOfRange {
                    warn!(
                        view_id,
                        view_count = scene.view_count(),
                        "Skipping view: id out of range"
                    );
                } else {
                    debug!(view_id, %reason, "Skipping view");
                }
                plan.skipped.push(SkippedView { view_id, reason });
            }
        }
    }
    plan
}

/// Ordered candidate ids, see [`plan_batch`].
pub fn select_candidates(
    scene: &dyn Scene,
    explicit_ids: &[ViewId],
    force: bool,
    target_embedding: &str,
) -> Vec<ViewId> {
    plan_batch(scene, explicit_ids, force, target_embedding).candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::ViewInfo;
    use crate::scene::testing::MemoryScene;

    const TARGET: &str = "depth-L0";

    /// Five views: view 2 has an invalid camera, view 3 is already done.
    fn five_views() -> MemoryScene {
        let valid = ViewInfo::with_embeddings(["undistorted"]);
        let invalid = ViewInfo {
            camera_valid: false,
            ..valid.clone()
        };
        let done = ViewInfo::with_embeddings(["undistorted", TARGET]);
        MemoryScene::new(vec![
            Some(valid.clone()),
            Some(valid.clone()),
            Some(invalid),
            Some(done),
            Some(valid),
        ])
    }

    #[test]
    fn test_select_skips_invalid_and_finished() {
        let scene = five_views();
        assert_eq!(select_candidates(&scene, &[], false, TARGET), vec![0, 1, 4]);
    }

    #[test]
    fn test_select_force_keeps_finished() {
        let scene = five_views();
        assert_eq!(select_candidates(&scene, &[], true, TARGET), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_other_scale_is_not_finished() {
        let scene = five_views();
        assert_eq!(
            select_candidates(&scene, &[], false, "depth-L1"),
            vec![0, 1, 3, 4]
        );
    }

    #[test]
    fn test_explicit_ids_keep_order_and_duplicates() {
        let scene = five_views();
        assert_eq!(
            select_candidates(&scene, &[4, 0, 4, 1], false, TARGET),
            vec![4, 0, 4, 1]
        );
    }

    #[test]
    fn test_explicit_ids_are_still_filtered() {
        let scene = five_views();
        let plan = plan_batch(&scene, &[3, 2, 9, 1], false, TARGET);
        assert_eq!(plan.candidates, vec![1]);
        assert_eq!(
            plan.skipped,
            vec![
                SkippedView {
                    view_id: 3,
                    reason: SkipReason::AlreadyReconstructed
                },
                SkippedView {
                    view_id: 2,
                    reason: SkipReason::InvalidCamera
                },
                SkippedView {
                    view_id: 9,
                    reason: SkipReason::OutOfRange
                },
            ]
        );
        assert_eq!(plan.skipped_for(SkipReason::OutOfRange), 1);
    }

    #[test]
    fn test_absent_view_is_skipped() {
        let scene = MemoryScene::new(vec![None, Some(ViewInfo::with_embeddings(["undistorted"]))]);
        let plan = plan_batch(&scene, &[], false, TARGET);
        assert_eq!(plan.candidates, vec![1]);
        assert_eq!(plan.skipped[0].reason, SkipReason::Absent);
    }

    #[test]
    fn test_empty_scene_plans_nothing() {
        let scene = MemoryScene::new(Vec::new());
        let plan = plan_batch(&scene, &[], false, TARGET);
        assert!(plan.is_empty());
        assert!(plan.skipped.is_empty());
    }
}
