//! Configuration for a dmrecon run.
//!
//! Settings are layered: `<scene>/dmrecon.toml`, then environment variables,
//! then command-line flags. Every layer is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [recon]
//! scale = 1
//! global_vs_max = 6
//! filter_width = 7
//! image_embedding = "undistorted"
//!
//! [orchestrator]
//! max_parallel = 8
//! progress = "simple"
//! poll_interval_ms = 250
//! force = false
//! plydest = "/recon"
//! logdest = "/log"
//!
//! [command]
//! program = "dmrecon-mvs"
//! args = ["--threads", "1"]
//! ```

use crate::errors::ConfigError;
use crate::orchestrator::STATUS_FILE;
use crate::orchestrator::default_parallelism;
use crate::progress::ProgressStyle;
use crate::settings::ReconSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the optional per-scene configuration file.
pub const CONFIG_FILE: &str = "dmrecon.toml";
/// Reconstruction program used when neither file nor environment names one.
pub const DEFAULT_RECON_CMD: &str = "dmrecon-mvs";
/// Environment variable naming the reconstruction program.
pub const RECON_CMD_ENV: &str = "DMRECON_RECON_CMD";
/// Environment variable limiting the number of parallel jobs.
pub const MAX_PARALLEL_ENV: &str = "DMRECON_MAX_PARALLEL";

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_plydest() -> String {
    "/recon".to_string()
}

fn default_logdest() -> String {
    "/log".to_string()
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Maximum parallel reconstructions (default: hardware threads)
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Progress style: silent, simple or fancy
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Reconstruct views that already have a depth map
    #[serde(default)]
    pub force: bool,
    /// Suffix appended to the scene directory for PLY output
    #[serde(default = "default_plydest")]
    pub plydest: String,
    /// Suffix appended to the scene directory for logs
    #[serde(default = "default_logdest")]
    pub logdest: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_parallel: None,
            progress: None,
            poll_interval_ms: default_poll_interval_ms(),
            force: false,
            plydest: default_plydest(),
            logdest: default_logdest(),
        }
    }
}

/// `[command]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSection {
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments passed before the per-view ones
    #[serde(default)]
    pub args: Vec<String>,
}

/// Parsed `dmrecon.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconToml {
    /// Defaults for every reconstruction
    #[serde(default)]
    pub recon: ReconSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub command: CommandSection,
}

impl ReconToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `<scene_dir>/dmrecon.toml`, or defaults if it does not exist.
    pub fn load_or_default(scene_dir: &Path) -> Result<Self, ConfigError> {
        let path = scene_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reconstruction program (file → env → default).
    pub fn recon_cmd(&self) -> String {
        self.command
            .program
            .clone()
            .or_else(|| std::env::var(RECON_CMD_ENV).ok())
            .unwrap_or_else(|| DEFAULT_RECON_CMD.to_string())
    }

    /// Parallel job limit from file or env, if either sets one.
    pub fn max_parallel(&self) -> Option<usize> {
        self.orchestrator.max_parallel.or_else(|| {
            std::env::var(MAX_PARALLEL_ENV)
                .ok()
                .and_then(|v| v.trim().parse().ok())
        })
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(style) = &self.orchestrator.progress
            && style.parse::<ProgressStyle>().is_err()
        {
            warnings.push(format!(
                "Invalid progress style '{}': should be silent, simple or fancy",
                style
            ));
        }
        if self.orchestrator.max_parallel == Some(0) {
            warnings.push("max_parallel = 0 runs nothing; using 1".to_string());
        }
        if self.orchestrator.poll_interval_ms == 0 {
            warnings.push("poll_interval_ms = 0 would busy-loop the renderer".to_string());
        }
        if self.recon.filter_width % 2 == 0 {
            warnings.push(format!(
                "filter_width {} is even; patches are centered on odd widths",
                self.recon.filter_width
            ));
        }

        warnings
    }
}

/// Command-line values layered over the file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub neighbors: Option<usize>,
    pub scale: Option<u32>,
    pub filter_width: Option<u32>,
    pub no_color_scale: bool,
    pub image: Option<String>,
    pub keep_dz: bool,
    pub keep_conf: bool,
    pub write_ply: bool,
    pub plydest: Option<String>,
    pub logdest: Option<String>,
    pub progress: Option<String>,
    pub force: bool,
    pub max_parallel: Option<usize>,
    pub recon_cmd: Option<String>,
}

/// Fully resolved configuration of one run.
#[derive(Debug, Clone)]
pub struct ReconConfig {
    pub scene_dir: PathBuf,
    /// Template cloned into every job
    pub settings: ReconSettings,
    pub progress: ProgressStyle,
    pub poll_interval: Duration,
    pub force: bool,
    pub max_parallel: usize,
    pub recon_cmd: String,
    pub recon_args: Vec<String>,
    pub log_dir: PathBuf,
    /// Problems found while resolving; none of them are fatal
    pub warnings: Vec<String>,
}

impl ReconConfig {
    /// Load the scene's config file and apply `cli` on top.
    pub fn load(scene_dir: &Path, cli: &CliOverrides) -> Result<Self, ConfigError> {
        let toml = ReconToml::load_or_default(scene_dir)?;
        Ok(Self::resolve(scene_dir, toml, cli))
    }

    pub fn resolve(scene_dir: &Path, toml: ReconToml, cli: &CliOverrides) -> Self {
        let mut warnings = toml.validate();

        let progress = match cli.progress.as_ref().or(toml.orchestrator.progress.as_ref()) {
            None => ProgressStyle::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                let fallback = ProgressStyle::default();
                if cli.progress.is_some() {
                    warnings.push(format!(
                        "Unrecognized progress style '{}', using {}",
                        raw, fallback
                    ));
                }
                fallback
            }),
        };

        let max_parallel = match cli.max_parallel.or_else(|| toml.max_parallel()) {
            Some(0) => 1,
            Some(n) => n,
            None => default_parallelism(),
        };

        let plydest = cli.plydest.as_deref().unwrap_or(&toml.orchestrator.plydest);
        let logdest = cli.logdest.as_deref().unwrap_or(&toml.orchestrator.logdest);
        let log_dir = join_suffix(scene_dir, logdest);

        let mut settings = toml.recon.clone();
        if let Some(n) = cli.neighbors {
            settings.global_vs_max = n;
        }
        if let Some(scale) = cli.scale {
            settings.scale = scale;
        }
        if let Some(width) = cli.filter_width {
            settings.filter_width = width;
        }
        if let Some(image) = &cli.image {
            settings.image_embedding = image.clone();
        }
        settings.use_color_scale &= !cli.no_color_scale;
        settings.keep_dz_map |= cli.keep_dz;
        settings.keep_confidence_map |= cli.keep_conf;
        settings.write_ply |= cli.write_ply;
        settings.ply_path = Some(join_suffix(scene_dir, plydest));
        settings.log_path = Some(log_dir.clone());
        // Progress is shown by the renderer unless the simple style is used.
        settings.quiet = progress != ProgressStyle::Simple;

        Self {
            scene_dir: scene_dir.to_path_buf(),
            settings,
            progress,
            poll_interval: Duration::from_millis(toml.orchestrator.poll_interval_ms.max(1)),
            force: cli.force || toml.orchestrator.force,
            max_parallel,
            recon_cmd: cli.recon_cmd.clone().unwrap_or_else(|| toml.recon_cmd()),
            recon_args: toml.command.args.clone(),
            log_dir,
            warnings,
        }
    }

    /// Where the JSON status report of the run is written.
    pub fn status_file(&self) -> PathBuf {
        self.log_dir.join(STATUS_FILE)
    }
}

/// Append a `/suffix` style destination to the scene directory.
fn join_suffix(scene_dir: &Path, suffix: &str) -> PathBuf {
    let suffix = suffix.trim_start_matches('/');
    if suffix.is_empty() {
        scene_dir.to_path_buf()
    } else {
        scene_dir.join(suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_full_config() {
        let content = r#"
[recon]
scale = 2
global_vs_max = 6
keep_dz_map = true

[orchestrator]
max_parallel = 3
progress = "simple"
poll_interval_ms = 100
force = true
logdest = "/logs"

[command]
program = "/opt/mvs/bin/recon"
args = ["--threads", "1"]
"#;
        let toml = ReconToml::parse(content).unwrap();
        assert_eq!(toml.recon.scale, 2);
        assert_eq!(toml.recon.global_vs_max, 6);
        assert_eq!(toml.recon.filter_width, 5);
        assert!(toml.recon.keep_dz_map);
        assert_eq!(toml.orchestrator.max_parallel, Some(3));
        assert_eq!(toml.orchestrator.plydest, "/recon");
        assert_eq!(toml.orchestrator.logdest, "/logs");
        assert_eq!(toml.recon_cmd(), "/opt/mvs/bin/recon");
        assert_eq!(toml.command.args, vec!["--threads", "1"]);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let toml = ReconToml::parse("").unwrap();
        assert_eq!(toml.orchestrator.poll_interval_ms, 250);
        assert_eq!(toml.orchestrator.plydest, "/recon");
        assert!(!toml.orchestrator.force);
        assert_eq!(toml.recon, ReconSettings::default());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = ReconToml::load_or_default(dir.path()).unwrap();
        assert!(toml.command.program.is_none());
    }

    #[test]
    fn test_load_reports_parse_error_with_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[recon\nscale = ").unwrap();
        let err = ReconToml::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_validate_warnings() {
        let content = r#"
[recon]
filter_width = 4

[orchestrator]
max_parallel = 0
progress = "noisy"
"#;
        let warnings = ReconToml::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("noisy"));
        assert!(warnings[1].contains("max_parallel"));
        assert!(warnings[2].contains("filter_width 4"));
    }

    #[test]
    fn test_recon_cmd_priority() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var(RECON_CMD_ENV).ok();
        unsafe { std::env::remove_var(RECON_CMD_ENV) };

        let toml = ReconToml::default();
        assert_eq!(toml.recon_cmd(), DEFAULT_RECON_CMD);

        unsafe { std::env::set_var(RECON_CMD_ENV, "env-recon") };
        assert_eq!(toml.recon_cmd(), "env-recon");

        let toml = ReconToml::parse("[command]\nprogram = \"file-recon\"\n").unwrap();
        assert_eq!(toml.recon_cmd(), "file-recon");

        unsafe { std::env::remove_var(RECON_CMD_ENV) };
        if let Some(val) = saved {
            unsafe { std::env::set_var(RECON_CMD_ENV, val) };
        }
    }

    #[test]
    fn test_max_parallel_env_fallback() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var(MAX_PARALLEL_ENV).ok();

        unsafe { std::env::set_var(MAX_PARALLEL_ENV, "6") };
        assert_eq!(ReconToml::default().max_parallel(), Some(6));
        let toml = ReconToml::parse("[orchestrator]\nmax_parallel = 2\n").unwrap();
        assert_eq!(toml.max_parallel(), Some(2));

        unsafe { std::env::set_var(MAX_PARALLEL_ENV, "many") };
        assert_eq!(ReconToml::default().max_parallel(), None);

        unsafe { std::env::remove_var(MAX_PARALLEL_ENV) };
        if let Some(val) = saved {
            unsafe { std::env::set_var(MAX_PARALLEL_ENV, val) };
        }
    }

    #[test]
    fn test_resolve_applies_cli_over_file() {
        let toml = ReconToml::parse(
            "[recon]\nscale = 1\n[orchestrator]\nprogress = \"silent\"\nmax_parallel = 2\n",
        )
        .unwrap();
        let cli = CliOverrides {
            scale: Some(3),
            neighbors: Some(8),
            no_color_scale: true,
            keep_conf: true,
            progress: Some("simple".into()),
            max_parallel: Some(5),
            recon_cmd: Some("./recon.sh".into()),
            force: true,
            ..Default::default()
        };

        let config = ReconConfig::resolve(Path::new("/data/scene"), toml, &cli);

        assert_eq!(config.settings.scale, 3);
        assert_eq!(config.settings.global_vs_max, 8);
        assert!(!config.settings.use_color_scale);
        assert!(config.settings.keep_confidence_map);
        assert_eq!(config.progress, ProgressStyle::Simple);
        assert!(!config.settings.quiet);
        assert_eq!(config.max_parallel, 5);
        assert_eq!(config.recon_cmd, "./recon.sh");
        assert!(config.force);
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_resolve_destinations() {
        let cli = CliOverrides {
            logdest: Some("/custom/logs".into()),
            ..Default::default()
        };
        let config = ReconConfig::resolve(Path::new("/data/scene"), ReconToml::default(), &cli);
        assert_eq!(
            config.settings.ply_path.as_deref(),
            Some(Path::new("/data/scene/recon"))
        );
        assert_eq!(config.log_dir, PathBuf::from("/data/scene/custom/logs"));
        assert_eq!(
            config.status_file(),
            PathBuf::from("/data/scene/custom/logs").join(STATUS_FILE)
        );
    }

    #[test]
    fn test_unknown_cli_progress_keeps_default() {
        let cli = CliOverrides {
            progress: Some("loud".into()),
            max_parallel: Some(0),
            ..Default::default()
        };
        let config = ReconConfig::resolve(Path::new("/scene"), ReconToml::default(), &cli);
        assert_eq!(config.progress, ProgressStyle::default());
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].contains("loud"));
        assert_eq!(config.max_parallel, 1);
    }

    #[test]
    fn test_quiet_unless_simple() {
        for (style, quiet) in [("silent", true), ("simple", false), ("fancy", true)] {
            let cli = CliOverrides {
                progress: Some(style.into()),
                ..Default::default()
            };
            let config = ReconConfig::resolve(Path::new("/scene"), ReconToml::default(), &cli);
            assert_eq!(config.settings.quiet, quiet, "style {style}");
        }
    }
}
