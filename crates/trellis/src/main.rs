//! Trellis CLI entry point.

use clap::Parser;
use trellis::cli::{Cli, ExitStatus};
use trellis_logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "trellis",
        verbose: cli.verbose,
    }) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    match trellis::cli::run(cli).await {
        Ok(ExitStatus::Success) => {}
        Ok(ExitStatus::Failure) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
