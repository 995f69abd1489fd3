mod config;
mod dataset;
mod manifest;
mod output;
mod scan;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::dataset::{BuildOptions, build_dataset};

#[derive(Parser)]
#[command(name = "bartune", version, about = "Acoustic dataset builder for tuned percussion bars")]
struct Cli {
    /// Config file (defaults to <root>/bartune.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every recording and regenerate data/ and reports/
    Build {
        /// Dataset root holding audio/, manifest/, data/ and reports/
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Skip bars that fail to decode or analyze instead of aborting
        #[arg(long)]
        keep_going: bool,

        /// Number of parallel workers (0 = from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Build {
            root,
            keep_going,
            jobs,
        } => {
            let config = AppConfig::load(cli.config.as_deref(), &root);
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let report = build_dataset(&root, &config, &BuildOptions { keep_going, workers })
                .with_context(|| format!("Build failed for {}", root.display()))?;

            println!(
                "Built {} bars ({} skipped, {} with QC flags)",
                report.n_bars, report.n_skipped, report.n_flagged
            );
            println!(
                "Reference: {} at {:.3} Hz",
                report.reference.bar_id, report.reference.f_ref_hz_measured
            );
        }
    }
    Ok(())
}
