use clap::Parser;
use std::process::ExitCode;

use cicdctl::cli::Cli;
use cicdctl::commands;
use cicdctl::config::env_flag;
use cicdctl::report::{Reporter, StatusMarkers};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let markers = if cli.no_color || env_flag("NO_COLOR") {
        StatusMarkers::plain()
    } else {
        StatusMarkers::colored()
    };
    let reporter = Reporter::new(markers);

    match commands::run(cli, &reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            reporter.failed(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
