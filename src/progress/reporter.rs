//! Background rendering loop over the progress registry.
//!
//! The reporter owns at most one thread. The thread polls
//! [`ProgressRegistry::snapshot`] on a fixed interval and hands the result to
//! a [`Renderer`]. It never writes job state.

use super::registry::{JobSnapshot, ProgressRegistry};
use crate::errors::ConfigError;
use crate::ui::{FancyRenderer, SimpleRenderer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default delay between two renders.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How progress is shown while a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStyle {
    /// No rendering thread
    Silent,
    /// One line per status change
    Simple,
    /// Multi-bar terminal display
    Fancy,
}

impl Default for ProgressStyle {
    #[cfg(windows)]
    fn default() -> Self {
        Self::Simple
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self::Fancy
    }
}

impl std::str::FromStr for ProgressStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "simple" => Ok(Self::Simple),
            "fancy" => Ok(Self::Fancy),
            other => Err(ConfigError::InvalidProgressStyle(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProgressStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStyle::Silent => write!(f, "silent"),
            ProgressStyle::Simple => write!(f, "simple"),
            ProgressStyle::Fancy => write!(f, "fancy"),
        }
    }
}

/// Draws registry snapshots. Runs on the reporter thread only.
pub trait Renderer: Send {
    fn render(&mut self, jobs: &[JobSnapshot], total_views: usize);

    /// Called once after the last render, when the loop stops.
    fn finish(&mut self, jobs: &[JobSnapshot], total_views: usize) {
        self.render(jobs, total_views);
    }
}

/// Drives a [`Renderer`] from a dedicated thread.
///
/// Lifecycle: [`start`](Self::start) spawns the loop, [`stop`](Self::stop)
/// signals it, [`join`](Self::join) waits for it to exit. `stop` and `join`
/// are no-ops when no loop is running. Dropping a running reporter stops and
/// joins it.
pub struct ProgressReporter {
    registry: Arc<ProgressRegistry>,
    style: ProgressStyle,
    interval: Duration,
    label: String,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn new(registry: Arc<ProgressRegistry>, style: ProgressStyle, interval: Duration) -> Self {
        Self {
            registry,
            style,
            interval,
            label: String::new(),
            stop_tx: None,
            thread: None,
        }
    }

    /// Text shown in the header of the fancy display (usually the scene path).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn style(&self) -> ProgressStyle {
        self.style
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Spawn the rendering loop for the configured style.
    ///
    /// Does nothing in silent mode or when a loop is already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        let renderer: Box<dyn Renderer> = match self.style {
            ProgressStyle::Silent => return Ok(()),
            ProgressStyle::Simple => Box::new(SimpleRenderer::stdout()),
            ProgressStyle::Fancy => Box::new(FancyRenderer::new(&self.label)),
        };
        self.start_with(renderer)
    }

    /// Spawn the rendering loop with a caller-supplied renderer.
    pub fn start_with(&mut self, mut renderer: Box<dyn Renderer>) -> std::io::Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let registry = Arc::clone(&self.registry);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("dmrecon-progress".to_string())
            .spawn(move || {
                loop {
                    renderer.render(&registry.snapshot(), registry.total_views());
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                renderer.finish(&registry.snapshot(), registry.total_views());
            })?;

        debug!(style = %self.style, interval_ms = interval.as_millis() as u64, "Progress reporter started");
        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        Ok(())
    }

    /// Ask the loop to exit after its current render.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The loop may already have exited; a closed channel is fine.
            let _ = tx.send(());
        }
    }

    /// Wait for the loop thread to terminate.
    ///
    /// Implies [`stop`](Self::stop), so it cannot wait on a loop nobody will
    /// signal.
    pub fn join(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Progress renderer panicked");
            } else {
                debug!("Progress reporter stopped");
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("style", &self.style)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counts {
        renders: AtomicUsize,
        finishes: AtomicUsize,
        last_seen: Mutex<Vec<JobStatus>>,
    }

    struct CountingRenderer(Arc<Counts>);

    impl Renderer for CountingRenderer {
        fn render(&mut self, jobs: &[JobSnapshot], _total_views: usize) {
            self.0.renders.fetch_add(1, Ordering::SeqCst);
            *self.0.last_seen.lock().unwrap() = jobs.iter().map(|j| j.status).collect();
        }

        fn finish(&mut self, jobs: &[JobSnapshot], total_views: usize) {
            self.render(jobs, total_views);
            self.0.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reporter(style: ProgressStyle) -> (Arc<ProgressRegistry>, ProgressReporter) {
        let registry = Arc::new(ProgressRegistry::new());
        let reporter = ProgressReporter::new(Arc::clone(&registry), style, Duration::from_millis(5));
        (registry, reporter)
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let (_registry, mut reporter) = reporter(ProgressStyle::Simple);
        reporter.stop();
        reporter.join();
        assert!(!reporter.is_running());
    }

    #[test]
    fn test_start_stop_join_runs_final_render() {
        let (registry, mut reporter) = reporter(ProgressStyle::Simple);
        registry.register_jobs([0, 1]);
        let counts = Arc::new(Counts::default());

        reporter
            .start_with(Box::new(CountingRenderer(Arc::clone(&counts))))
            .unwrap();
        assert!(reporter.is_running());
        thread::sleep(Duration::from_millis(30));
        registry.set_status(0, JobStatus::Done);
        registry.fail(1, "boom");

        reporter.stop();
        reporter.join();

        assert!(!reporter.is_running());
        assert!(counts.renders.load(Ordering::SeqCst) >= 2);
        assert_eq!(counts.finishes.load(Ordering::SeqCst), 1);
        assert_eq!(
            *counts.last_seen.lock().unwrap(),
            vec![JobStatus::Done, JobStatus::Failed]
        );
    }

    #[test]
    fn test_join_without_stop_returns() {
        let (_registry, mut reporter) = reporter(ProgressStyle::Simple);
        let counts = Arc::new(Counts::default());
        reporter
            .start_with(Box::new(CountingRenderer(Arc::clone(&counts))))
            .unwrap();
        reporter.join();
        assert_eq!(counts.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_silent_spawns_no_thread() {
        let (registry, mut reporter) = reporter(ProgressStyle::Silent);
        reporter.start().unwrap();
        assert!(!reporter.is_running());
        // Registry stays writable without a reader
        registry.set_status(3, JobStatus::Running);
        reporter.stop();
        reporter.join();
    }

    #[test]
    fn test_second_start_keeps_first_loop() {
        let (_registry, mut reporter) = reporter(ProgressStyle::Simple);
        let first = Arc::new(Counts::default());
        let second = Arc::new(Counts::default());
        reporter
            .start_with(Box::new(CountingRenderer(Arc::clone(&first))))
            .unwrap();
        reporter
            .start_with(Box::new(CountingRenderer(Arc::clone(&second))))
            .unwrap();
        reporter.join();
        assert_eq!(first.finishes.load(Ordering::SeqCst), 1);
        assert_eq!(second.renders.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_joins_running_loop() {
        let counts = Arc::new(Counts::default());
        {
            let (_registry, mut reporter) = reporter(ProgressStyle::Simple);
            reporter
                .start_with(Box::new(CountingRenderer(Arc::clone(&counts))))
                .unwrap();
        }
        assert_eq!(counts.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_style_parse() {
        assert_eq!("fancy".parse::<ProgressStyle>().unwrap(), ProgressStyle::Fancy);
        assert_eq!(" Simple ".parse::<ProgressStyle>().unwrap(), ProgressStyle::Simple);
        assert_eq!("SILENT".parse::<ProgressStyle>().unwrap(), ProgressStyle::Silent);
        let err = "loud".parse::<ProgressStyle>().unwrap_err();
        assert!(err.to_string().contains("loud"));
        assert_eq!(ProgressStyle::Simple.to_string(), "simple");
    }
}
