//! Command-line interface definitions for the `provcheck` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `provcheck` binary.
#[derive(Debug, Parser)]
#[command(
    name = "provcheck",
    version,
    about = "Validate and dry-run provisioning scripts without changing the host",
    long_about = "Discovers shell and PowerShell provisioning scripts, checks their \
                  syntax, classifies whether they are safe to exercise here, and runs \
                  the least invasive invocation each script supports. Writes a console \
                  trace, a run log, and a JSON report."
)]
pub(crate) struct Cli {
    /// Directory to search for scripts (defaults to the configured root).
    #[arg(value_name = "PATH")]
    pub(crate) path: Option<String>,
    /// Validate syntax only; never run a script.
    #[arg(long)]
    pub(crate) skip_execution: bool,
    /// Skip paths matching GLOB, relative to PATH (repeatable).
    #[arg(long, value_name = "GLOB")]
    pub(crate) exclude: Vec<String>,
    /// Show parse-error positions, probe commands, and captured output.
    #[arg(short, long)]
    pub(crate) verbose: bool,
    /// Per-script invocation timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
    /// Maximum number of scripts checked at once.
    #[arg(long, value_name = "N")]
    pub(crate) concurrency: Option<usize>,
    /// Directory receiving the run log and JSON reports.
    #[arg(long, value_name = "DIR")]
    pub(crate) output_dir: Option<String>,
}
