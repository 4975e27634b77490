//! Parallel batch executor.
//!
//! Jobs are dispatched in candidate order, one per semaphore permit, onto
//! tokio's blocking pool. A worker that finishes a cheap view frees its
//! permit and the next pending view starts immediately. Each job runs behind
//! a panic boundary and a [`ProgressHandle`], so a failing reconstruction
//! only ever affects its own registry entry.

use super::selection::{BatchPlan, plan_batch};
use super::state::{BatchSummary, ExecutionTimer, JobOutcome};
use crate::errors::{JobError, ReconError, SceneError};
use crate::job::JobSpec;
use crate::progress::{ProgressHandle, ProgressRegistry};
use crate::recon::ReconstructorFactory;
use crate::scene::{Scene, ViewId};
use crate::settings::ReconSettings;
use crate::util::{lock, panic_message};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Configuration for the batch executor.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of reconstructions running at once
    pub max_parallel: usize,
    /// Save each successfully reconstructed view as soon as it finishes
    pub persist_results: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_parallelism(),
            persist_results: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_persist_results(mut self, persist: bool) -> Self {
        self.persist_results = persist;
        self
    }
}

/// Number of hardware threads, or 1 if unknown.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Serializes `save_view` calls for scenes that cannot save concurrently.
#[derive(Debug)]
struct SaveGate {
    serial: Option<Mutex<()>>,
}

impl SaveGate {
    fn for_scene(scene: &dyn Scene) -> Self {
        Self {
            serial: (!scene.supports_concurrent_saves()).then(|| Mutex::new(())),
        }
    }

    fn save(&self, scene: &dyn Scene, view_id: ViewId) -> Result<(), SceneError> {
        let _guard = self.serial.as_ref().map(lock);
        scene.save_view(view_id)
    }
}

/// Everything one worker needs to run one job.
struct JobContext {
    spec: JobSpec,
    scene: Arc<dyn Scene>,
    factory: Arc<dyn ReconstructorFactory>,
    registry: Arc<ProgressRegistry>,
    save_gate: Arc<SaveGate>,
    persist: bool,
}

impl JobContext {
    /// Run the job to a terminal state. Never panics.
    fn execute(self) -> JobOutcome {
        let view_id = self.spec.view_id();
        let timer = ExecutionTimer::start();

        let result = match catch_unwind(AssertUnwindSafe(|| self.reconstruct())) {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked {
                view_id,
                message: panic_message(payload.as_ref()),
            }),
        };

        if let Err(e) = result {
            error!(view_id, error = %e, "Reconstruction failed");
            return JobOutcome::failure(view_id, &e, timer.elapsed());
        }

        let outcome = JobOutcome::success(view_id, timer.elapsed());
        if !self.persist {
            return outcome;
        }
        match self.save_gate.save(self.scene.as_ref(), view_id) {
            Ok(()) => outcome,
            Err(source) => {
                let e = JobError::Persist { view_id, source };
                error!(view_id, error = %e, "Failed to save view");
                outcome.with_persist_error(&e)
            }
        }
    }

    fn reconstruct(&self) -> Result<(), JobError> {
        let handle = ProgressHandle::acquire(&self.registry, &self.spec);
        match self.run_reconstruction(&handle) {
            Ok(()) => {
                handle.mark_done();
                Ok(())
            }
            Err(e) => {
                handle.fail(&e.to_string());
                Err(e.into())
            }
        }
    }

    fn run_reconstruction(&self, handle: &ProgressHandle<'_>) -> Result<(), ReconError> {
        let mut recon = self
            .factory
            .create(Arc::clone(&self.scene), self.spec.settings())?;
        if let Some(probe) = recon.probe() {
            handle.attach_probe(&probe);
        }
        recon.start()
    }
}

/// Selects views and runs their reconstructions in parallel.
pub struct Orchestrator {
    scene: Arc<dyn Scene>,
    factory: Arc<dyn ReconstructorFactory>,
    registry: Arc<ProgressRegistry>,
    config: OrchestratorConfig,
    save_gate: Arc<SaveGate>,
}

impl Orchestrator {
    pub fn new(
        scene: Arc<dyn Scene>,
        factory: Arc<dyn ReconstructorFactory>,
        registry: Arc<ProgressRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let save_gate = Arc::new(SaveGate::for_scene(scene.as_ref()));
        registry.set_total_views(scene.view_count());
        Self {
            scene,
            factory,
            registry,
            config,
            save_gate,
        }
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Select the batch for `explicit_ids` (all views when empty).
    pub fn plan(&self, explicit_ids: &[ViewId], force: bool, template: &ReconSettings) -> BatchPlan {
        plan_batch(
            self.scene.as_ref(),
            explicit_ids,
            force,
            &template.target_embedding(),
        )
    }

    fn job_context(&self, template: &ReconSettings, view_id: ViewId, persist: bool) -> JobContext {
        JobContext {
            spec: JobSpec::new(template, view_id),
            scene: Arc::clone(&self.scene),
            factory: Arc::clone(&self.factory),
            registry: Arc::clone(&self.registry),
            save_gate: Arc::clone(&self.save_gate),
            persist,
        }
    }

    /// Run every candidate and wait for all of them.
    ///
    /// Candidates are registered as `Queued` up front. Per-job failures are
    /// recorded in the registry and the returned summary; they never stop the
    /// batch. On return every registered candidate is `Done` or `Failed`.
    pub async fn run_batch(&self, candidates: &[ViewId], template: &ReconSettings) -> BatchSummary {
        let timer = ExecutionTimer::start();
        let mut summary = BatchSummary::new(candidates.len());
        self.registry.register_jobs(candidates.iter().copied());

        info!(
            jobs = candidates.len(),
            max_parallel = self.config.max_parallel,
            "Starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut tasks = JoinSet::new();
        let mut active_tasks: HashMap<task::Id, ViewId> = HashMap::new();

        for &view_id in candidates {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let ctx = self.job_context(template, view_id, self.config.persist_results);
            let handle = tasks.spawn_blocking(move || {
                let _permit = permit; // Hold until complete
                ctx.execute()
            });
            active_tasks.insert(handle.id(), view_id);

            while let Some(joined) = tasks.try_join_next_with_id() {
                self.collect(joined, &mut active_tasks, &mut summary);
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.collect(joined, &mut active_tasks, &mut summary);
        }

        summary.duration = timer.elapsed();
        info!(
            done = summary.done,
            failed = summary.failed,
            duration_ms = summary.duration.as_millis() as u64,
            "Batch finished"
        );
        summary
    }

    /// Run one view without saving it; persisting is up to the caller.
    pub async fn run_single(&self, view_id: ViewId, template: &ReconSettings) -> JobOutcome {
        self.registry.register_job(view_id);
        let ctx = self.job_context(template, view_id, false);
        match task::spawn_blocking(move || ctx.execute()).await {
            Ok(outcome) => outcome,
            Err(e) => self.worker_lost(view_id, &e),
        }
    }

    fn collect(
        &self,
        joined: Result<(task::Id, JobOutcome), JoinError>,
        active_tasks: &mut HashMap<task::Id, ViewId>,
        summary: &mut BatchSummary,
    ) {
        let outcome = match joined {
            Ok((id, outcome)) => {
                active_tasks.remove(&id);
                outcome
            }
            Err(e) => {
                let Some(view_id) = active_tasks.remove(&e.id()) else {
                    warn!(error = %e, "Lost track of a finished worker");
                    return;
                };
                self.worker_lost(view_id, &e)
            }
        };
        debug!(view_id = outcome.view_id, status = %outcome.status, "Job collected");
        summary.add_outcome(outcome);
    }

    fn worker_lost(&self, view_id: ViewId, e: &JoinError) -> JobOutcome {
        let err = JobError::WorkerLost {
            view_id,
            message: e.to_string(),
        };
        error!(view_id, error = %err, "Worker ended abnormally");
        self.registry.fail(view_id, err.to_string());
        JobOutcome::failure(view_id, &err, Duration::ZERO)
    }
}
