//! Batch progress renderers.
//!
//! Both renderers are driven by the progress reporter thread with a fresh
//! registry snapshot on every tick. They keep the last status they saw per
//! view and only draw what changed:
//! - `FancyRenderer`: header bar plus one bar per running view
//! - `SimpleRenderer`: one plain line per status change

use crate::job::JobStatus;
use crate::progress::{JobSnapshot, Renderer};
use crate::scene::ViewId;
use crate::ui::icons::{CHECK, CROSS, RUNNING, SPARKLE};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

/// Format a duration the way every dmrecon message shows it.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn elapsed(job: &JobSnapshot) -> String {
    format_duration(Duration::from_millis(job.elapsed_ms.unwrap_or(0)))
}

/// Multi-bar terminal display.
pub struct FancyRenderer {
    multi: MultiProgress,
    header: ProgressBar,
    bars: HashMap<ViewId, ProgressBar>,
    last_status: HashMap<ViewId, JobStatus>,
}

impl FancyRenderer {
    /// Draw to stdout, with `label` (usually the scene path) in the header.
    ///
    /// Logs go to stderr, so bars and log lines never share a stream.
    pub fn new(label: &str) -> Self {
        Self::with_draw_target(label, ProgressDrawTarget::stdout())
    }

    pub fn with_draw_target(label: &str, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let header_style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▓▒░");

        let header = multi.add(ProgressBar::new(0));
        header.set_style(header_style);
        header.set_prefix(if label.is_empty() {
            "dmrecon".to_string()
        } else {
            label.to_string()
        });
        header.set_message("Starting...");

        Self {
            multi,
            header,
            bars: HashMap::new(),
            last_status: HashMap::new(),
        }
    }

    fn view_bar(&mut self, view_id: ViewId) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(view_id).or_insert_with(|| {
            let bar_style = ProgressStyle::default_bar()
                .template("  {prefix:.bold} [{bar:30.green/white}] {pos:>3}% {msg}")
                .unwrap()
                .progress_chars("█▓░");
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(bar_style);
            bar.set_prefix(format!("view {:04}", view_id));
            bar
        })
    }

    fn on_finished(&mut self, job: &JobSnapshot) {
        if let Some(bar) = self.bars.remove(&job.view_id) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        let line = if job.status.is_success() {
            format!(
                "  {} View {} {} ({})",
                CHECK,
                style(job.view_id).green().bold(),
                style("done").green(),
                elapsed(job)
            )
        } else {
            format!(
                "  {} View {} {}: {}",
                CROSS,
                style(job.view_id).red().bold(),
                style("failed").red(),
                job.error.as_deref().unwrap_or("unknown error")
            )
        };
        self.multi.println(line).ok();
    }
}

impl Renderer for FancyRenderer {
    fn render(&mut self, jobs: &[JobSnapshot], total_views: usize) {
        let mut finished = 0;
        let mut running = 0;

        for job in jobs {
            let previous = self.last_status.insert(job.view_id, job.status);
            match job.status {
                JobStatus::Queued => {}
                JobStatus::Running => {
                    running += 1;
                    let message = format!("{} {}", RUNNING, elapsed(job));
                    let bar = self.view_bar(job.view_id);
                    bar.set_position(job.progress as u64);
                    bar.set_message(message);
                }
                JobStatus::Done | JobStatus::Failed => {
                    finished += 1;
                    if previous != Some(job.status) {
                        self.on_finished(job);
                    }
                }
            }
        }

        self.header.set_length(jobs.len() as u64);
        self.header.set_position(finished);
        self.header.set_message(format!(
            "{} running, {} views in scene",
            running, total_views
        ));
    }

    fn finish(&mut self, jobs: &[JobSnapshot], total_views: usize) {
        self.render(jobs, total_views);
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
        let done = jobs.iter().filter(|j| j.status == JobStatus::Done).count();
        let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
        self.header.finish_with_message(format!(
            "{} {} finished, {} failed",
            SPARKLE, done, failed
        ));
    }
}

/// Line-per-change output for terminals without cursor control.
pub struct SimpleRenderer {
    out: Box<dyn Write + Send>,
    last_status: HashMap<ViewId, JobStatus>,
}

impl SimpleRenderer {
    pub fn stdout() -> Self {
        Self::new(Box::new(Term::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            last_status: HashMap::new(),
        }
    }

    fn line(job: &JobSnapshot) -> Option<String> {
        match job.status {
            JobStatus::Queued => None,
            JobStatus::Running => Some(format!(
                "View {:04}: {}",
                job.view_id,
                style("started").cyan()
            )),
            JobStatus::Done => Some(format!(
                "View {:04}: {} in {}",
                job.view_id,
                style("done").green(),
                elapsed(job)
            )),
            JobStatus::Failed => Some(format!(
                "View {:04}: {} ({})",
                job.view_id,
                style("failed").red(),
                job.error.as_deref().unwrap_or("unknown error")
            )),
        }
    }
}

impl Renderer for SimpleRenderer {
    fn render(&mut self, jobs: &[JobSnapshot], _total_views: usize) {
        for job in jobs {
            if self.last_status.insert(job.view_id, job.status) == Some(job.status) {
                continue;
            }
            if let Some(line) = Self::line(job) {
                let _ = writeln!(self.out, "{}", line);
            }
        }
        let _ = self.out.flush();
    }

    fn finish(&mut self, jobs: &[JobSnapshot], total_views: usize) {
        self.render(jobs, total_views);
        let done = jobs.iter().filter(|j| j.status == JobStatus::Done).count();
        let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
        let _ = writeln!(
            self.out,
            "Finished {}/{} jobs ({} failed, {} views in scene)",
            done,
            jobs.len(),
            failed,
            total_views
        );
        let _ = self.out.flush();
    }
}
