//! Batch orchestration of per-view reconstructions.
//!
//! | Module      | Responsibility                                     |
//! |-------------|----------------------------------------------------|
//! | `selection` | Which views become jobs, and why others are skipped |
//! | `executor`  | Parallel dispatch with per-job failure isolation   |
//! | `state`     | Job outcomes, batch summary and the status report  |

pub mod executor;
pub mod selection;
pub mod state;

pub use executor::{Orchestrator, OrchestratorConfig, default_parallelism};
pub use selection::{BatchPlan, SkipReason, SkippedView, check_view, plan_batch, select_candidates};
pub use state::{BatchSummary, ExecutionTimer, JobOutcome, STATUS_FILE, StatusReport};
