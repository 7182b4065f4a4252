//! Command-line driver for the KPD exchange simulator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kpdsim_core::{DataSource, Parameters, Sinks, run_all_iterations};

/// Kidney paired donation exchange simulator.
#[derive(Debug, Parser)]
#[command(name = "kpdsim")]
#[command(about = "Simulates match runs over a kidney paired donation pool")]
struct Cli {
    /// Parameter file with key=value lines; built-in defaults when omitted.
    #[arg(long)]
    parameters: Option<PathBuf>,
    /// Directory holding the input CSV tables.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Root directory for simulation output.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let params = match &cli.parameters {
        Some(path) => match Parameters::load(path) {
            Ok(params) => params,
            Err(err) => {
                error!(%err, path = %path.display(), "cannot load parameters");
                return ExitCode::FAILURE;
            }
        },
        None => Parameters::default(),
    };

    let data = match DataSource::load(&cli.data_dir, &params) {
        Ok(data) => data,
        Err(err) => {
            error!(%err, dir = %cli.data_dir.display(), "cannot load input tables");
            return ExitCode::FAILURE;
        }
    };
    info!(
        candidates = data.candidate_pool_size(),
        "input tables loaded"
    );

    let mut sinks = match Sinks::create(&cli.output_dir, &params) {
        Ok(sinks) => sinks,
        Err(err) => {
            error!(%err, dir = %cli.output_dir.display(), "cannot create output files");
            return ExitCode::FAILURE;
        }
    };

    match run_all_iterations(&params, &data, &mut sinks) {
        Ok(completed) => {
            info!(completed, "simulation finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
