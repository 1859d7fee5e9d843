use clap::Parser;
use colored::*;
use qzcli::cli::{args::Cli, run_cli};
use qzcli::common::QzError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_INTERRUPTED: u8 = 130;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<QzError>(), Some(QzError::Interrupted)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_interrupt(&e) => {
            eprintln!();
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
