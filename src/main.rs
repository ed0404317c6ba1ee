//! CLI entry point: run one fly scan against simulated hardware.
//!
//! ```bash
//! hxn_flyscan --config config/flyscan.toml --mode realistic \
//!     --x -1.0 1.0 20 --y 0.0 0.5 5 --exp-time 0.01 --trigger-rate 50
//! ```
//!
//! Documents are printed to stdout as JSON lines; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use daq_driver_mock::MockMode;
use hxn_flyscan::config::{FlyScanSettings, DEFAULT_CONFIG_PATH};
use hxn_flyscan::{logging, FlyScanRequest, SimulatedBeamline};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hxn_flyscan")]
#[command(about = "Run an HXN fly scan against simulated hardware", long_about = None)]
struct Cli {
    /// Settings file (missing file means defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Timing of the simulated hardware
    #[arg(long, value_enum, default_value_t = SimMode::Instant)]
    mode: SimMode,

    /// Fast axis: START STOP POINTS
    #[arg(long, num_args = 3, value_names = ["START", "STOP", "N"], allow_negative_numbers = true)]
    x: Vec<f64>,

    /// Slow axis: START STOP POINTS
    #[arg(long, num_args = 3, value_names = ["START", "STOP", "N"], allow_negative_numbers = true)]
    y: Vec<f64>,

    /// Detector exposure per frame, seconds
    #[arg(long, default_value = "0.01")]
    exp_time: f64,

    /// Controller trigger rate, Hz
    #[arg(long, default_value = "7.0")]
    trigger_rate: f64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SimMode {
    Instant,
    Realistic,
    Chaos,
}

impl From<SimMode> for MockMode {
    fn from(mode: SimMode) -> Self {
        match mode {
            SimMode::Instant => MockMode::Instant,
            SimMode::Realistic => MockMode::Realistic,
            SimMode::Chaos => MockMode::Chaos,
        }
    }
}

fn axis(values: &[f64], default: (f64, f64, usize)) -> (f64, f64, usize) {
    match values {
        [start, stop, n] => (*start, *stop, n.max(0.0) as usize),
        _ => default,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = FlyScanSettings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    let beamline = SimulatedBeamline::new(&settings, cli.mode.into());
    let runner = beamline.runner(&settings);

    let mut docs = runner.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(doc) = docs.recv().await {
            match serde_json::to_string(&doc) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize document"),
            }
        }
    });

    let request = FlyScanRequest::new(axis(&cli.x, (0.0, 1.0, 10)), axis(&cli.y, (0.0, 1.0, 10)), cli.exp_time)
        .with_trigger_rate(cli.trigger_rate);
    let result = runner.run(request).await;

    drop(runner);
    printer.await.context("document printer panicked")?;

    let summary = result?;
    info!(run_uid = %summary.run_uid, num_events = summary.num_events, "Done");
    Ok(())
}
