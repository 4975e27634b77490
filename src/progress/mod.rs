//! Job progress tracking.
//!
//! - [`ProgressRegistry`]: shared status map written by workers
//! - [`ProgressHandle`]: per-job guard that always leaves a terminal status
//! - [`ProgressReporter`]: optional thread that renders the registry

pub mod handle;
pub mod registry;
pub mod reporter;

pub use handle::ProgressHandle;
pub use registry::{JobSnapshot, ProgressProbe, ProgressRegistry, StatusCounts};
pub use reporter::{DEFAULT_POLL_INTERVAL, ProgressReporter, ProgressStyle, Renderer};
