use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use fleetnet::config_loader::{self, StoreOverrides};
use fleetnet::planner::NetworkPlanner;

/// Plan IP reservations for the instances of a fleet deployment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the deployment manifest YAML file
    #[arg(short, long)]
    manifest: PathBuf,

    /// Write the placement report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep reservations in a ledger file at this path
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep reservations in memory only, ignoring the manifest's store
    #[arg(long, conflicts_with = "store")]
    transient: bool,

    /// Place the instances of each job concurrently
    #[arg(long)]
    parallel: bool,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Starting fleetnet");
    info!("Manifest: {:?}", args.manifest);

    // Load the manifest and let CLI flags override its reservation store
    let mut manifest = config_loader::load_manifest(&args.manifest)?;
    config_loader::apply_store_overrides(
        &mut manifest,
        &StoreOverrides {
            ledger: args.store.clone(),
            transient: args.transient,
        },
    );

    // Resolve networks against the configured store
    let planner = NetworkPlanner::from_manifest(&manifest)
        .wrap_err_with(|| format!("Failed to resolve networks of '{}'", manifest.name))?;

    // Check every job's networks and zones before reserving anything
    planner
        .validate_jobs(&manifest.jobs)
        .wrap_err("Job network validation failed")?;

    if manifest.jobs.is_empty() {
        warn!("Manifest declares no jobs; nothing to place");
    }

    // Place instances
    let placements = if args.parallel {
        planner.place_parallel(&manifest.jobs)
    } else {
        planner.place(&manifest.jobs)
    }
    .wrap_err("Instance placement failed")?;

    // Build the per-instance settings report
    let report = planner
        .report(&placements)
        .wrap_err("Failed to build placement report")?;

    // Write the report to the requested file, or stdout
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .wrap_err_with(|| format!("Failed to create report file '{}'", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &report).wrap_err("Failed to write report")?;
            writer.flush()?;
            info!("Placement report written to: {:?}", path);
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &report).wrap_err("Failed to write report")?;
            writeln!(writer)?;
        }
    }

    info!(
        "Placed {} instance(s) across {} network(s)",
        placements.len(),
        planner.networks().len()
    );
    Ok(())
}
