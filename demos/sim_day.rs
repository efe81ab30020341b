//! Simulated day: one reverse auction per hour over a generated task field.
//!
//! Loads a JSON simulation config (or starts from the defaults), applies the
//! CLI overrides, runs the configured phase and writes round reports, the
//! day summary and the final worker state into a timestamped result
//! directory.

use clap::Parser;
use std::time::Instant;
use tracing::info;

use imcu::config::{load_json, save_json, Phase, SimConfig};
use imcu::logger;
use imcu::market::data::RationalityDistribution;
use imcu::market::report::{
    create_result_dir, day_summary, write_diagnostics_json, write_payments_csv,
    write_selection_csv,
};
use imcu::sim::Simulation;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON simulation config; defaults are used when absent
    #[arg(long)]
    config: Option<String>,

    /// Override the phase: truthful, bounded or adaptive
    #[arg(long)]
    phase: Option<Phase>,

    /// Override the base seed
    #[arg(long)]
    seed: Option<u64>,

    /// Record per-iteration selection steps and per-winner payment traces
    #[arg(long, default_value_t = false)]
    debug_traces: bool,

    /// Base directory for result folders
    #[arg(long, default_value = "results")]
    out: String,

    /// Log filter, e.g. info or imcu=debug
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config: SimConfig = match &cli.config {
        Some(path) => match load_json(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                return Err(e.into());
            }
        },
        None => SimConfig::default(),
    };
    if let Some(phase) = cli.phase {
        config.phase = phase;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if cli.debug_traces {
        config.auction.debug = true;
    }
    // The behavioral phases need their population layers; fill in the
    // defaults when the config leaves them out.
    match config.phase {
        Phase::Truthful => {}
        Phase::Bounded => {
            if config.workers.rationality.is_none() {
                config.workers.rationality = Some(RationalityDistribution::Mixed);
            }
        }
        Phase::Adaptive => {
            if config.workers.rationality.is_none() {
                config.workers.rationality = Some(RationalityDistribution::Mixed);
            }
            config.workers.with_beliefs = true;
        }
    }

    let label = format!("{}_{}", config.day, config.phase);
    let result_dir = create_result_dir(&cli.out, &label)?;
    let _guard = logger::init(result_dir.join("simulation.log"), &cli.log)?;

    info!("results will be saved to {}", result_dir.display());
    save_json(&config, result_dir.join("config.json"))?;

    let started = Instant::now();
    let mut sim = Simulation::new(config)?;
    sim.run()?;
    info!(
        "{} rounds simulated in {:.2}s",
        sim.rounds().len(),
        started.elapsed().as_secs_f64()
    );

    sim.write_results(&result_dir)?;
    if let Some(last) = sim.rounds().last() {
        write_diagnostics_json(&last.diagnostics, &result_dir)?;
        write_selection_csv(&result_dir.join("selection_trace.csv"), &last.diagnostics)?;
        write_payments_csv(&result_dir.join("payment_trace.csv"), &last.diagnostics)?;
    }

    let summary = day_summary(sim.rounds());
    info!(
        "day totals: vS {:.2}, payments {:.2}, platform utility {:.2}, mean efficiency {:.3}",
        summary.v_mech_total,
        summary.sum_payments_total,
        summary.u0_mech_total,
        summary.efficiency_ratio_mean
    );

    Ok(())
}
