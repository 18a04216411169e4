use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mac_lab_abstract::{Scenario, SimConfig};
use mac_lab_simulator::{Simulation, SimulationReport, TraceWriter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless shared-medium MAC contention simulator")]
struct Args {
    /// Path to the scenario TOML file to execute.
    #[arg(long)]
    scenario: PathBuf,

    /// Override the RNG seed from the scenario file.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the simulation horizon in seconds.
    #[arg(long)]
    horizon: Option<f64>,

    /// Directory where the per-event CSV log is written.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Write a JSON summary of the finished simulation.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("mac-lab-sim-cli starting...");

    let mut scenario = load_scenario(&args.scenario)?;
    if let Some(seed) = args.seed {
        scenario.config.seed = seed;
    }
    if let Some(horizon) = args.horizon {
        scenario.config.horizon = horizon;
    }

    let log_path = args.output_dir.join(output_file_name(&scenario.config));
    let trace = TraceWriter::to_path(&log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    let mut sim = Simulation::new(&scenario, trace)
        .with_context(|| format!("Invalid scenario {:?}", scenario.name))?;
    let report = sim.run()?;
    log_summary(&report, &log_path);

    if let Some(report_path) = &args.report_out {
        write_report(report_path, &report)?;
    }

    Ok(())
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: Scenario =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

/// `output_<interarrival>_<seed>.csv`, with the mean inter-arrival time in
/// whole microseconds. The downstream aggregation splits on underscores.
fn output_file_name(config: &SimConfig) -> String {
    let interarrival_us = (config.interarrival.mean() * 1e6).round() as u64;
    format!("output_{}_{}.csv", interarrival_us, config.seed)
}

fn log_summary(report: &SimulationReport, log_path: &Path) {
    let generated: u64 = report.nodes.iter().map(|n| n.generated).sum();
    let received: u64 = report.nodes.iter().map(|n| n.received).sum();
    let corrupted: u64 = report.nodes.iter().map(|n| n.corrupted).sum();
    let dropped: u64 = report.nodes.iter().map(|n| n.queue_dropped).sum();
    info!(
        "Simulated {:.3} s | generated: {} | received: {} | corrupted: {} | dropped: {} | log: {}",
        report.duration,
        generated,
        received,
        corrupted,
        dropped,
        log_path.display()
    );
}

fn write_report(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}
