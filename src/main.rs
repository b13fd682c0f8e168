mod cli;
mod execute;

use std::process::ExitCode;
use clap::Parser;
use anyhow::Result;
use crate::cli::CLI;

fn main() -> Result<ExitCode> {
    let cli = CLI::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SHIMKIT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    execute::execute(cli)
}
