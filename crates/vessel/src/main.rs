use anyhow::Result;
use clap::Parser;
use vessel_core::errors::{ConcurrencyError, VesselError};

mod cli;
mod commands;

/// Exit code when a required confirmation was refused or impossible
const EXIT_CONFIRM_REFUSED: i32 = 2;
/// Exit code when the task already runs at its parallelism limit
const EXIT_ALREADY_RUNNING: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(code) => {
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Err(err) => {
            if let Some(vessel_error) = err.downcast_ref::<VesselError>() {
                let code = match vessel_error {
                    VesselError::Confirm(_) => Some(EXIT_CONFIRM_REFUSED),
                    VesselError::Concurrency(ConcurrencyError::AlreadyRunning { .. }) => {
                        Some(EXIT_ALREADY_RUNNING)
                    }
                    _ => None,
                };
                if let Some(code) = code {
                    eprintln!("Error: {}", vessel_error);
                    std::process::exit(code);
                }
            }

            // Everything else exits 1 through anyhow's report
            Err(err)
        }
    }
}
