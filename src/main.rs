//! agentrelay - in-memory message relay for named agents.

use clap::Parser;
use std::process::ExitCode;

use agentrelay::{logging, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Held until exit so the file writer flushes.
    let _log_guard = match logging::init() {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let args = Commands::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
