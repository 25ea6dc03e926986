//! Entry point for the chaos experiment runner: a CLI that loads an
//! experiment document, validates it, runs it, and writes the resulting
//! journal.
//!
//! ```bash
//! runner run --file experiment.json --output journal.json
//! runner validate --file experiment.json
//! ```

mod configuration;
mod controls;
mod errors;
mod executor;
mod loader;
mod model;
mod orchestrator;
mod providers;
mod steady_state;
mod telemetry;
mod validation;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::Level;

use errors::ChaosError;
use model::Settings;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "runner")]
#[command(about = "Runs chaos engineering experiments and records a journal of the outcome", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validates an experiment document without running it.
    Validate {
        /// Path to the experiment document (.json, .yaml or .yml).
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Runs an experiment document and writes its journal.
    Run {
        /// Path to the experiment document (.json, .yaml or .yml).
        #[arg(short, long)]
        file: PathBuf,

        /// Path to a runner settings document (global controls). Optional.
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Where to write the resulting journal. Printed to stdout if unset.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Forces dry-run mode regardless of what the document declares.
        #[arg(long, default_value = "false")]
        dry: bool,

        /// Sends traces to an OTLP collector.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// OTLP collector endpoint. Defaults to `http://localhost:4317` when
        /// `--otel` is set and `OTEL_EXPORTER_OTLP_ENDPOINT` isn't.
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Only log errors.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Log at debug level.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate { file } => run_validate(file),
        Commands::Run { file, settings, output, dry, otel, otel_endpoint, silent, verbose } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *silent {
                Level::ERROR
            } else if *verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };

            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            if let Err(e) = init_telemetry(telemetry_config) {
                eprintln!("could not initialize telemetry: {e}");
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exit_code = run_experiment_command(file, settings.as_deref(), output.as_deref(), *dry).await;

            shutdown_telemetry();
            std::process::exit(exit_code);
        }
    }
}

fn run_validate(file: &PathBuf) {
    match loader::load_experiment_from_file(file) {
        Ok(experiment) => match validation::validate_experiment(&experiment) {
            Ok(()) => println!("experiment '{}' is valid", experiment.title),
            Err(ChaosError::InvalidExperiment(errors)) => {
                eprintln!("experiment is invalid:");
                for error in errors {
                    eprintln!("  - {error}");
                }
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("could not validate experiment: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("could not load experiment: {e}");
            std::process::exit(1);
        }
    }
}

#[tracing::instrument(skip_all, fields(file = %file.display()))]
async fn run_experiment_command(
    file: &Path,
    settings_path: Option<&Path>,
    output: Option<&Path>,
    force_dry: bool,
) -> i32 {
    let mut experiment = match loader::load_experiment_from_file(file) {
        Ok(experiment) => experiment,
        Err(e) => {
            tracing::error!(error = %e, "could not load experiment");
            return 1;
        }
    };

    if let Err(e) = validation::validate_experiment(&experiment) {
        tracing::error!(error = %e, "experiment failed validation");
        return 1;
    }

    if force_dry {
        experiment.dry = true;
    }

    let settings = match settings_path {
        Some(path) => match load_settings(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "could not load runner settings");
                return 1;
            }
        },
        None => Settings::default(),
    };

    let journal = orchestrator::run_experiment(experiment, &settings).await;

    let serialized = match serde_json::to_string_pretty(&journal) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "could not serialize journal");
            return 1;
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, serialized) {
                tracing::error!(error = %e, path = %path.display(), "could not write journal");
                return 1;
            }
        }
        None => println!("{serialized}"),
    }

    match journal.status {
        model::JournalStatus::Completed if !journal.deviated => 0,
        _ => 1,
    }
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let contents = fs::read_to_string(path)?;
    let settings = match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
        _ => serde_json::from_str(&contents)?,
    };
    Ok(settings)
}
