//! Binary entry point for the provcheck CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use provcheck::config::{ConfigError, ConfigOverrides, HarnessConfig};
use provcheck::harness::{Harness, HarnessError};
use provcheck::privilege::host_probe;
use provcheck::probe::ProcessProbeRunner;
use provcheck::report::{EXIT_SUCCESS, EXIT_USAGE};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Harness(#[from] HarnessError),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => EXIT_USAGE,
            Self::Harness(err) => err.exit_code(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                EXIT_USAGE
            } else {
                EXIT_SUCCESS
            };
            err.print().ok();
            process::exit(code);
        }
    };
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let exit_code = match run(cli, cancel).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };
    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .ok();
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received; finishing in-flight scripts");
            cancel.cancel();
        }
        Err(err) => warn!(error = %err, "cannot listen for interrupts"),
    }
}

fn overrides(cli: Cli) -> ConfigOverrides {
    ConfigOverrides {
        root: cli.path,
        exclude: cli.exclude,
        skip_execution: cli.skip_execution,
        verbose: cli.verbose,
        timeout_secs: cli.timeout,
        concurrency: cli.concurrency,
        output_dir: cli.output_dir,
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<i32, CliError> {
    let settings = HarnessConfig::load_without_cli_args()?
        .with_overrides(overrides(cli))
        .into_settings()?;
    let harness = Harness::new(settings, ProcessProbeRunner, host_probe());
    let outcome = harness.run(Box::new(io::stdout()), cancel).await?;
    Ok(outcome.report.exit_code)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "provcheck: {err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
