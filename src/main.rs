use std::process::ExitCode;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

mod archive;
mod autostart;
mod cli;
mod commands;
mod config;
mod daemon;
mod error;
mod installer;
mod notify;
mod platform;
mod releases;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TAILELEC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = cli::Cli::parse();

    let result = match cli.command.unwrap_or(cli::Commands::Install) {
        cli::Commands::Install => commands::install::execute(),
        cli::Commands::Check { no_notify } => commands::check::execute(!no_notify),
        cli::Commands::Watch => commands::watch::execute(),
        cli::Commands::Status => commands::status::execute(),
        cli::Commands::Uninstall { purge } => commands::uninstall::execute(purge),
    };

    if let Err(e) = result {
        let label = e
            .downcast_ref::<error::Error>()
            .map_or_else(|| style("error:").red().bold(), error::Error::label);
        eprintln!("{label} {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
