//! Satellite Access Analyzer CLI
//!
//! Predicts ground station access windows and Sun/Earth angles for every
//! satellite of a scenario and writes them as CSV.
//!
//! Usage:
//!   access-analyzer --config scenario.json --output out/ --workers 8
//!   access-analyzer --example

use access_analyzer::config::{self, ScenarioConfig};
use access_analyzer::{cancel_pair, BatchScheduler, CsvSinkFactory, TaskOutcome};
use anyhow::{bail, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "access-analyzer",
    about = "Predict satellite access windows and local-orbital-frame Sun/Earth angles"
)]
struct Args {
    /// Scenario JSON file
    #[arg(short, long, required_unless_present = "example", conflicts_with = "example")]
    config: Option<PathBuf>,

    /// Run the built-in Freiburg / 700 km SSO scenario
    #[arg(long)]
    example: bool,

    /// Output directory (overrides the scenario's output_dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent satellite tasks (overrides the scenario's workers)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Also write the batch report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit non-zero when any satellite did not complete
    #[arg(long)]
    strict: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "access_analyzer=debug,info"
    } else {
        "access_analyzer=info,warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let started = Instant::now();
    info!("{}", "=".repeat(60));
    info!("Satellite Access Analyzer");
    info!("{}", "=".repeat(60));

    let scenario_config: ScenarioConfig = match &args.config {
        Some(path) => config::load_config(path)?,
        None => {
            info!("Using built-in example scenario");
            config::example_scenario()
        },
    };
    let scenario = scenario_config.build()?;

    let output_dir = args.output.unwrap_or(scenario.output_dir);
    let scheduler = match args.workers.or(scenario.workers) {
        Some(workers) => BatchScheduler::new(workers),
        None => BatchScheduler::default(),
    };
    info!("   Output directory: {:?}", output_dir);
    info!("   Stations: {}", scenario.stations.len());
    info!("   Satellites: {}", scenario.satellites.len());
    if !scenario.rejected.is_empty() {
        warn!("   Not scheduled: {}", scenario.rejected.len());
    }

    let (cancel_handle, cancel_token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining work");
            cancel_handle.cancel();
        }
    });

    let report = scheduler
        .execute(
            scenario.satellites,
            Arc::new(scenario.context),
            Arc::new(CsvSinkFactory::new(&output_dir)),
            cancel_token,
        )
        .await
        .merge(scenario.rejected);

    info!("{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    for entry in report.entries() {
        match &entry.outcome {
            TaskOutcome::Completed(summary) => {
                info!("  {}: {} samples", entry.satellite, summary.samples);
                for (station, count) in &summary.windows {
                    info!("    {}: {} access window(s)", station, count);
                }
            },
            other => error!("  {}: {:?}", entry.satellite, other),
        }
    }

    if let Some(path) = &args.report {
        info!("Writing batch report to {:?}", path);
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &report)?;
    }

    info!("Elapsed: {:.3} s", started.elapsed().as_secs_f64());

    if args.strict && !report.all_succeeded() {
        bail!("{} satellite(s) did not complete", report.failures().len());
    }
    Ok(())
}
