//! RaidSim
//!
//! Runs a simulated rebuild of one failed column and prints the outcome as
//! JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           raidsim                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌──────────────────┐    ┌──────────────┐  │
//! │  │  Config    │───▶│ RebuildSimulation│───▶│ JSON report  │  │
//! │  │ (YAML/CLI) │    │ queues, map, loop│    │   (stdout)   │  │
//! │  └────────────┘    └──────────────────┘    └──────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use raidcore::config::parse_duration;
use raidcore::sim::{RebuildSimulation, SimConfig};
use raidcore::DisciplineKind;

// =============================================================================
// CLI Arguments
// =============================================================================

/// RaidSim - Simulated RAID rebuild driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with a full simulation config; flags below override it
    #[arg(long, env = "RAIDSIM_CONFIG")]
    config: Option<PathBuf>,

    /// Columns in the array, not counting the spare
    #[arg(long, env = "RAIDSIM_COLUMNS")]
    columns: Option<usize>,

    /// Sectors per disk
    #[arg(long, env = "RAIDSIM_SECTORS")]
    sectors: Option<u64>,

    /// Sectors per reconstruction unit
    #[arg(long, env = "RAIDSIM_SECTORS_PER_RU")]
    sectors_per_ru: Option<u64>,

    /// Column to rebuild
    #[arg(long, env = "RAIDSIM_FAILED_COLUMN")]
    failed_column: Option<usize>,

    /// Queueing discipline (fifo, sstf, scan, cscan)
    #[arg(long, env = "RAIDSIM_DISCIPLINE")]
    discipline: Option<DisciplineKind>,

    /// Maximum outstanding requests per disk
    #[arg(long, env = "RAIDSIM_MAX_OUTSTANDING")]
    max_outstanding: Option<usize>,

    /// Per-request latency (e.g. "2ms")
    #[arg(long, env = "RAIDSIM_LATENCY")]
    latency: Option<String>,

    /// Fail the surviving copy as well
    #[arg(long, env = "RAIDSIM_FAIL_SOURCE")]
    fail_source: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn sim_config(&self) -> anyhow::Result<SimConfig> {
        let mut config: SimConfig = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => SimConfig::default(),
        };

        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(sectors) = self.sectors {
            config.sectors = sectors;
        }
        if let Some(spr) = self.sectors_per_ru {
            config.recon.sectors_per_ru = spr;
        }
        if let Some(column) = self.failed_column {
            config.failed_column = column;
        }
        if let Some(discipline) = self.discipline {
            config.queue.discipline = discipline;
        }
        if let Some(max) = self.max_outstanding {
            config.queue.max_outstanding = max;
        }
        if let Some(latency) = &self.latency {
            config.latency = parse_duration(latency)?;
        }
        config.fail_source |= self.fail_source;

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.sim_config()?;

    info!("Starting rebuild simulation");
    info!("  Columns: {}", config.columns);
    info!("  Sectors per disk: {}", config.sectors);
    info!("  Sectors per unit: {}", config.recon.sectors_per_ru);
    info!("  Failed column: {}", config.failed_column);
    info!("  Discipline: {}", config.queue.discipline);
    info!("  Max outstanding: {}", config.queue.max_outstanding);

    let report = RebuildSimulation::new(config)?.run().map_err(|e| {
        error!("Rebuild failed: {}", e);
        e
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Simulation complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so the report on stdout stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
