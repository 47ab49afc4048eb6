use std::io;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing::error;

use cli::{
    config::{Cli, RunConfig},
    run,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let _ = dotenv::dotenv();

    let config = match RunConfig::try_from(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            // Missing positionals: show usage and leave successfully
            if let Err(io_err) = Cli::command().print_help() {
                error!("Failed to print usage: {io_err}");
            }
            println!();
            return ExitCode::from(e.exit_code());
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run(&config, &mut out) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
