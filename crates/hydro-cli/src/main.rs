// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — CLI
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Command-line front end. Exit codes: 0 success, 1 fatal runtime
//! error, 2 invalid configuration, 3 incompatible restart state.

use clap::Parser;
use hydro_types::config::SimulationConfig;
use hydro_types::error::HydroError;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use tracing::error;

mod runner;

#[derive(Parser, Debug)]
#[command(
    name = "hydro",
    version,
    about = "Lagrangian runoff and flood-depth simulator"
)]
struct Cli {
    /// Path to the configuration JSON document.
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Checkpoint container to resume from.
    #[arg(long)]
    restart_in: Option<String>,

    /// Checkpoint container to write (overrides the configured path).
    #[arg(long)]
    restart_out: Option<String>,

    /// Results container path (overrides the configured path).
    #[arg(long)]
    out: Option<String>,
}

fn exit_code_for(err: &HydroError) -> ExitCode {
    match err {
        HydroError::ConfigurationInvalid(_) => ExitCode::from(2),
        HydroError::StateIncompatible(_) => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = match SimulationConfig::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(config = %cli.config, error = %err, "configuration rejected");
            return exit_code_for(&HydroError::ConfigurationInvalid(err.to_string()));
        }
    };
    let overrides = runner::RunOverrides {
        restart_in: cli.restart_in,
        restart_out: cli.restart_out,
        output: cli.out,
    };
    let cancel = AtomicBool::new(false);
    match runner::run_simulation(&cfg, &overrides, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "run failed");
            exit_code_for(&err)
        }
    }
}
