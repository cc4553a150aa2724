//! atmos-sim: replay overlay coordination scenarios on a headless host

mod runner;
mod scenario;

use std::path::PathBuf;
use std::process::ExitCode;

use atmos_core::config::{self, CoordinatorConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::runner::Runner;
use crate::scenario::Scenario;

#[derive(Parser)]
#[command(version, about = "Replay overlay coordination scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and check its expectations
    Run {
        scenario: PathBuf,
        /// Coordinator config (defaults to the user config, if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a coordinator config and print the effective values
    CheckConfig {
        path: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    // If ATMOS_LOG_PATH is set, append to that file
    if let Ok(path) = std::env::var("ATMOS_LOG_PATH") {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    // Fallback to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<CoordinatorConfig, String> {
    config::load_or_default(path.map(PathBuf::as_path)).map_err(|e| e.to_string())
}

fn run(scenario_path: &PathBuf, config_path: Option<&PathBuf>) -> Result<bool, String> {
    let config = load_config(config_path)?;
    let scenario = Scenario::load(scenario_path).map_err(|e| e.to_string())?;
    let name = scenario.display_name(scenario_path);
    tracing::info!(scenario = %name, steps = scenario.steps.len(), "Running scenario");

    let mut runner = Runner::new(&config);
    let mut stdout = std::io::stdout().lock();
    let report = runner.run(&scenario, &mut stdout).map_err(|e| e.to_string())?;
    drop(stdout);

    println!(
        "{name}: {} steps, {} checks, {} failed",
        report.steps,
        report.checks,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  FAILED {failure}");
    }
    Ok(report.passed())
}

fn check_config(path: Option<&PathBuf>) -> Result<bool, String> {
    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config).map_err(|e| e.to_string())?;
    print!("{rendered}");
    Ok(true)
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run { scenario, config } => run(scenario, config.as_ref()),
        Commands::CheckConfig { path } => check_config(path.as_ref()),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "atmos-sim failed");
            ExitCode::FAILURE
        }
    }
}
