//! wsfs binary: flags → config → logging → server.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use wsfs::config::Cli;
use wsfs::lifecycle::startup;
use wsfs::observability::logging;

#[tokio::main]
async fn main() -> ExitCode {
    // --help / --version exit 0 here, bad flags exit 2
    let cli = Cli::parse();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wsfs: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("wsfs: {}", e);
        return ExitCode::FAILURE;
    }

    match startup::run(Arc::new(config)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped with errors");
            ExitCode::FAILURE
        }
    }
}
