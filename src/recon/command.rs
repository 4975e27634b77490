//! Reconstruction through an external program.
//!
//! One process per view. The program receives the view and the settings as
//! command-line arguments and reports progress on stdout with either
//! `<progress>NN%</progress>` or `progress: NN`. Exit code zero means the
//! depth map was written; the view then gets its target embedding.

use super::{Reconstruction, ReconstructorFactory};
use crate::errors::{ReconError, SceneError};
use crate::progress::ProgressProbe;
use crate::scene::{Scene, ViewId};
use crate::settings::ReconSettings;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static PROGRESS_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<progress>\s*(\d{1,3})%?\s*</progress>").unwrap());

static PROGRESS_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*progress:\s*(\d{1,3})%?\s*$").unwrap());

/// Directory for PLY output when the settings do not name one.
const DEFAULT_PLY_DIR: &str = "recon";

/// Extract a progress percentage from one line of reconstruction output.
///
/// Values above 100 are clamped.
pub fn parse_progress(line: &str) -> Option<u32> {
    let caps = PROGRESS_TAG_REGEX
        .captures(line)
        .or_else(|| PROGRESS_LINE_REGEX.captures(line))?;
    let value = caps.get(1)?.as_str().parse::<u32>().ok()?;
    Some(value.min(100))
}

/// Factory spawning `program` once per view.
#[derive(Debug, Clone)]
pub struct CommandReconstructor {
    program: String,
    base_args: Vec<String>,
    scene_dir: PathBuf,
}

impl CommandReconstructor {
    pub fn new(program: impl Into<String>, scene_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            scene_dir: scene_dir.into(),
        }
    }

    /// Arguments placed before the generated ones.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list for one view.
    pub fn build_args(&self, settings: &ReconSettings) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "--scene".to_string(),
            self.scene_dir.display().to_string(),
            "--view".to_string(),
            settings.ref_view.to_string(),
            "--scale".to_string(),
            settings.scale.to_string(),
            "--filter-width".to_string(),
            settings.filter_width.to_string(),
            "--neighbors".to_string(),
            settings.global_vs_max.to_string(),
            "--image".to_string(),
            settings.image_embedding.clone(),
        ]);
        if !settings.use_color_scale {
            args.push("--nocolorscale".to_string());
        }
        if settings.keep_dz_map {
            args.push("--keep-dz".to_string());
        }
        if settings.keep_confidence_map {
            args.push("--keep-conf".to_string());
        }
        if settings.write_ply {
            let dir = settings
                .ply_path
                .clone()
                .unwrap_or_else(|| self.scene_dir.join(DEFAULT_PLY_DIR));
            args.push("--ply".to_string());
            args.push(dir.display().to_string());
        }
        args
    }
}

impl ReconstructorFactory for CommandReconstructor {
    fn create(
        &self,
        scene: Arc<dyn Scene>,
        settings: &ReconSettings,
    ) -> Result<Box<dyn Reconstruction>, ReconError> {
        let view_id = settings.ref_view;
        if scene.view(view_id).is_none() {
            return Err(SceneError::ViewAbsent { view_id }.into());
        }
        Ok(Box::new(CommandRun {
            view_id,
            program: self.program.clone(),
            args: self.build_args(settings),
            scene,
            settings: settings.clone(),
            probe: ProgressProbe::new(),
        }))
    }
}

/// A single spawned reconstruction.
struct CommandRun {
    view_id: ViewId,
    program: String,
    args: Vec<String>,
    scene: Arc<dyn Scene>,
    settings: ReconSettings,
    probe: ProgressProbe,
}

impl CommandRun {
    fn open_log(&self) -> Result<Option<(PathBuf, File)>, ReconError> {
        let Some(dir) = &self.settings.log_path else {
            return Ok(None);
        };
        let path = log_file_path(dir, self.view_id);
        let file = fs::create_dir_all(dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .map_err(|source| ReconError::Log {
                path: path.clone(),
                source,
            })?;
        Ok(Some((path, file)))
    }

    fn stream_output(
        &self,
        child: &mut Child,
        mut log: Option<&mut (PathBuf, File)>,
    ) -> Result<(), ReconError> {
        let Some(stdout) = child.stdout.take() else {
            return Ok(());
        };
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(percent) = parse_progress(line) {
                self.probe.set(percent);
            }
            if let Some((path, file)) = log.as_deref_mut() {
                writeln!(file, "{line}").map_err(|source| ReconError::Log {
                    path: path.clone(),
                    source,
                })?;
            }
            if !self.settings.quiet {
                info!(view_id = self.view_id, "{}", line);
            }
        }
        Ok(())
    }
}

impl Reconstruction for CommandRun {
    fn start(&mut self) -> Result<(), ReconError> {
        let mut log = self.open_log()?;

        let stderr = match (&log, self.settings.quiet) {
            (Some((_, file)), _) => Stdio::from(file.try_clone()?),
            (None, true) => Stdio::null(),
            (None, false) => Stdio::inherit(),
        };

        debug!(view_id = self.view_id, program = %self.program, args = ?self.args, "Spawning reconstruction");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(|source| ReconError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Err(e) = self.stream_output(&mut child, log.as_mut()) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(ReconError::NonZeroExit {
                view_id: self.view_id,
                exit_code: status.code().unwrap_or(-1),
            });
        }

        self.probe.set(100);
        self.scene
            .attach_embedding(self.view_id, &self.settings.target_embedding())?;
        Ok(())
    }

    fn probe(&self) -> Option<ProgressProbe> {
        Some(self.probe.clone())
    }
}

/// Log file of one view inside `dir`.
pub fn log_file_path(dir: &Path, view_id: ViewId) -> PathBuf {
    dir.join(format!("view-{view_id:04}.log"))
}
