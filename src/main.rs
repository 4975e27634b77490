use anyhow::Result;
use clap::Parser;
use dmrecon::scene::ViewId;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser, Debug)]
#[command(name = "dmrecon")]
#[command(version, about = "Reconstruct per-view depth maps of a multi-view scene")]
pub struct Cli {
    /// Scene directory
    pub scene_dir: PathBuf,

    /// Amount of neighbor views (global view selection)
    #[arg(short, long)]
    pub neighbors: Option<usize>,

    /// Reconstruct the given master view ID only
    #[arg(short, long)]
    pub master_view: Option<ViewId>,

    /// Reconstruct the given view IDs (e.g. "0-10,12")
    #[arg(short, long)]
    pub list_view: Option<String>,

    /// Reconstruction on the given scale (0 is original size)
    #[arg(short, long)]
    pub scale: Option<u32>,

    /// Patch size for NCC based comparison (default is 5)
    #[arg(short, long)]
    pub filter_width: Option<u32>,

    /// Turn off color scale
    #[arg(long)]
    pub nocolorscale: bool,

    /// Image embedding used in reconstruction
    #[arg(short, long)]
    pub image: Option<String>,

    /// Store dz map into view
    #[arg(long)]
    pub keep_dz: bool,

    /// Store confidence map into view
    #[arg(long)]
    pub keep_conf: bool,

    /// Write the ply file
    #[arg(short = 'p', long)]
    pub writeply: bool,

    /// Path suffix appended to scene dir to write ply files (default: /recon)
    #[arg(long)]
    pub plydest: Option<String>,

    /// Path suffix appended to scene dir to write log files (default: /log)
    #[arg(long)]
    pub logdest: Option<String>,

    /// Progress output style: silent, simple or fancy
    #[arg(long)]
    pub progress: Option<String>,

    /// Re-reconstruct existing depth maps
    #[arg(long)]
    pub force: bool,

    /// Maximum number of parallel reconstructions
    #[arg(short = 'j', long)]
    pub max_parallel: Option<usize>,

    /// Reconstruction program run once per view
    #[arg(long)]
    pub recon_cmd: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "dmrecon=debug" } else { "dmrecon=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    cmd::cmd_reconstruct(&cli).await
}
