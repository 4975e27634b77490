//! Depth-map reconstruction of a scene: `dmrecon <SCENE_DIR>`.

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;
use dmrecon::config::{CliOverrides, ReconConfig};
use dmrecon::errors::ConfigError;
use dmrecon::orchestrator::{BatchSummary, Orchestrator, OrchestratorConfig, StatusReport};
use dmrecon::progress::{ProgressRegistry, ProgressReporter};
use dmrecon::recon::CommandReconstructor;
use dmrecon::scene::{FsScene, Scene, ViewId};
use dmrecon::ui::format_duration;
use dmrecon::ui::icons::{CHECK, CLOCK, CROSS, FOLDER, SKIP};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::super::Cli;

/// Parse a view list such as `"0-10,12"`.
///
/// Tokens are comma separated and either a single id or an inclusive
/// `a-b` range. Empty tokens are ignored. This is pure logic that can be
/// unit-tested without a scene.
pub fn parse_view_list(list: &str) -> Result<Vec<ViewId>, ConfigError> {
    let invalid = |token: &str| ConfigError::InvalidViewList(token.to_string());
    let mut ids = Vec::new();

    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((first, last)) => {
                let first: ViewId = first.trim().parse().map_err(|_| invalid(token))?;
                let last: ViewId = last.trim().parse().map_err(|_| invalid(token))?;
                if first > last {
                    return Err(invalid(token));
                }
                ids.extend(first..=last);
            }
            None => ids.push(token.parse().map_err(|_| invalid(token))?),
        }
    }
    Ok(ids)
}

/// Map the parsed command line onto configuration overrides.
pub fn cli_overrides(cli: &Cli) -> CliOverrides {
    CliOverrides {
        neighbors: cli.neighbors,
        scale: cli.scale,
        filter_width: cli.filter_width,
        no_color_scale: cli.nocolorscale,
        image: cli.image.clone(),
        keep_dz: cli.keep_dz,
        keep_conf: cli.keep_conf,
        write_ply: cli.writeply,
        plydest: cli.plydest.clone(),
        logdest: cli.logdest.clone(),
        progress: cli.progress.clone(),
        force: cli.force,
        max_parallel: cli.max_parallel,
        recon_cmd: cli.recon_cmd.clone(),
    }
}

/// Run the reconstruction for the scene named on the command line.
///
/// Scene and configuration problems are fatal. Per-view failures are
/// reported in the summary and the status file but do not fail the command.
pub async fn cmd_reconstruct(cli: &Cli) -> Result<()> {
    let scene_dir = cli.scene_dir.as_path();
    let config = ReconConfig::load(scene_dir, &cli_overrides(cli))
        .context("Failed to load configuration")?;
    for warning in &config.warnings {
        warn!("{}", warning);
    }

    let explicit_ids = match &cli.list_view {
        Some(list) => parse_view_list(list)?,
        None => Vec::new(),
    };

    let scene = Arc::new(FsScene::load(scene_dir).context("Error loading scene")?);
    let started_at = Utc::now();

    println!(
        "{} {} ({} views)",
        FOLDER,
        style(scene_dir.display()).bold(),
        scene.view_count()
    );

    let registry = Arc::new(ProgressRegistry::new());
    let factory = Arc::new(
        CommandReconstructor::new(config.recon_cmd.clone(), scene_dir)
            .with_args(config.recon_args.clone()),
    );
    let orchestrator = Orchestrator::new(
        scene.clone(),
        factory,
        Arc::clone(&registry),
        OrchestratorConfig::default().with_max_parallel(config.max_parallel),
    );
    let mut reporter = ProgressReporter::new(Arc::clone(&registry), config.progress, config.poll_interval)
        .with_label(scene_dir.display().to_string());

    let (summary, skipped) = match cli.master_view {
        Some(view_id) => {
            println!("Reconstructing view with ID {}", view_id);
            start_reporter(&mut reporter);
            let outcome = orchestrator.run_single(view_id, &config.settings).await;
            (BatchSummary::single(outcome), Vec::new())
        }
        None => {
            if explicit_ids.is_empty() {
                println!("Reconstructing all views...");
            } else {
                println!("Reconstructing views from list...");
            }
            let plan = orchestrator.plan(&explicit_ids, config.force, &config.settings);
            start_reporter(&mut reporter);
            let mut summary = orchestrator.run_batch(&plan.candidates, &config.settings).await;
            summary.record_skipped(&plan.skipped);
            (summary, plan.skipped)
        }
    };

    reporter.stop();
    reporter.join();

    println!("Saving views back to disc...");
    if let Err(e) = scene.save_views() {
        error!(error = %e, "Failed to save views");
    }

    print_summary(&summary);

    let status_file = config.status_file();
    let report = StatusReport::new(scene_dir, started_at, summary, registry.snapshot(), skipped);
    match report.write_to(&status_file) {
        Ok(()) => info!(path = %status_file.display(), "Wrote status report"),
        Err(e) => warn!(error = %e, "Failed to write status report"),
    }

    Ok(())
}

fn start_reporter(reporter: &mut ProgressReporter) {
    if let Err(e) = reporter.start() {
        warn!(error = %e, style = %reporter.style(), "Progress display unavailable");
    }
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("{}", style("Reconstruction summary").bold().cyan());
    println!(
        "  {} {} done",
        CHECK,
        style(summary.done).green().bold()
    );
    if summary.failed > 0 {
        println!(
            "  {} {} failed: {}",
            CROSS,
            style(summary.failed).red().bold(),
            style(join_ids(&summary.failed_views())).red()
        );
    }
    if summary.persist_failures > 0 {
        println!(
            "  {} {} could not be saved",
            CROSS,
            style(summary.persist_failures).yellow().bold()
        );
    }
    if summary.skipped > 0 {
        println!("  {} {} skipped", SKIP, summary.skipped);
    }
    println!(
        "  {} {}",
        CLOCK,
        style(format_duration(summary.duration)).cyan()
    );
    if summary.failed > 0 {
        println!(
            "  Re-run failed views with: --list-view {}",
            join_ids(&summary.failed_views())
        );
    }
}

fn join_ids(ids: &[ViewId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
