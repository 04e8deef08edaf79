//! Console trace, per-run log file, and JSON report output.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, File, OpenOptions};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use super::{RunReport, ScriptRecord};
use crate::probe::{ExecutionOutcome, ProbeOutput};

/// Name of the report file overwritten on every run.
pub const REPORT_FILE: &str = "provcheck-report.json";

const FILE_PREFIX: &str = "provcheck";
const MAX_SUFFIX: usize = 1_000;

/// Failures while preparing or writing run artefacts.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The output directory could not be created or opened.
    #[error("failed to prepare output directory {path}: {message}")]
    OutputDir {
        /// Directory that was requested.
        path: Utf8PathBuf,
        /// Operating-system error text.
        message: String,
    },
    /// A report file could not be written.
    #[error("failed to write {path}: {message}")]
    Write {
        /// File that failed.
        path: Utf8PathBuf,
        /// Operating-system error text.
        message: String,
    },
    /// The report could not be serialised.
    #[error("failed to serialise report: {0}")]
    Serialise(String),
}

/// Locations of the artefacts written for a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportPaths {
    /// Plain-text log, if it could be created.
    pub log: Option<Utf8PathBuf>,
    /// Report at the fixed path.
    pub report: Utf8PathBuf,
    /// Timestamped copy of the report.
    pub archive: Utf8PathBuf,
}

/// Formats records and summaries as console lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleTrace {
    verbose: bool,
}

impl ConsoleTrace {
    /// Creates a formatter; verbose mode adds error positions and captured
    /// output.
    #[must_use]
    pub const fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Lines describing one completed script.
    #[must_use]
    pub fn script_lines(&self, record: &ScriptRecord) -> Vec<String> {
        let mut lines = Vec::new();
        let path = &record.path;

        match record.syntax.errors.first() {
            None => lines.push(format!("[SYNTAX PASS] {path}")),
            Some(first) if !self.verbose => {
                lines.push(format!("[SYNTAX FAIL] {path}: {}", first.message));
            }
            Some(_) => {
                lines.push(format!("[SYNTAX FAIL] {path}"));
                lines.extend(record.syntax.errors.iter().map(|err| format!("    {err}")));
            }
        }

        let execution = &record.execution;
        let label = execution.label();
        match execution.outcome {
            ExecutionOutcome::Pass => {
                let mode = execution.mode.map_or("", |mode| mode.label());
                lines.push(format!("[EXEC {label}] {path} ({mode})"));
            }
            ExecutionOutcome::Skipped => {
                lines.push(format!("[EXEC {label}] {path} ({})", execution.message));
            }
            ExecutionOutcome::Fail => {
                lines.push(format!("[EXEC {label}] {path}: {}", execution.message));
            }
        }

        if self.verbose {
            if let Some(command) = &execution.command {
                lines.push(format!("    command: {command}"));
            }
            if let Some(note) = &execution.note {
                lines.push(format!("    note: {note}"));
            }
            if let Some(output) = &execution.output {
                push_captured(&mut lines, output);
            }
        }
        lines
    }

    /// Closing summary block.
    #[must_use]
    pub fn summary_lines(&self, report: &RunReport) -> Vec<String> {
        let verdict = if report.cancelled {
            "CANCELLED"
        } else if report.succeeded() {
            "PASSED"
        } else {
            "FAILED"
        };
        vec![
            String::new(),
            format!(
                "Summary: {} of {} scripts checked in {}ms",
                report.total_scripts, report.discovered_scripts, report.duration_ms
            ),
            format!(
                "  syntax:    {} passed, {} failed",
                report.passed_syntax, report.failed_syntax
            ),
            format!(
                "  execution: {} passed, {} failed, {} skipped",
                report.passed_execution, report.failed_execution, report.skipped_execution
            ),
            format!("  result:    {verdict} (exit {})", report.exit_code),
        ]
    }
}

fn push_captured(lines: &mut Vec<String>, output: &ProbeOutput) {
    for (stream, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        if text.trim().is_empty() {
            continue;
        }
        lines.push(format!("    {stream}:"));
        lines.extend(text.lines().map(|line| format!("    | {line}")));
    }
}

/// Streams console lines, mirrors them to the run log, and writes the JSON
/// report.
///
/// Console and log write failures are logged and otherwise ignored; only
/// failing to prepare the output directory or to write the report is an
/// error.
pub struct ReportWriter {
    dir: Dir,
    dir_path: Utf8PathBuf,
    stamp: String,
    trace: ConsoleTrace,
    console: Option<Box<dyn Write + Send>>,
    log: Option<(Utf8PathBuf, File)>,
}

impl std::fmt::Debug for ReportWriter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReportWriter")
            .field("dir_path", &self.dir_path)
            .field("stamp", &self.stamp)
            .field("log", &self.log.as_ref().map(|(path, _)| path))
            .finish_non_exhaustive()
    }
}

impl ReportWriter {
    /// Creates the output directory and opens a fresh timestamped log.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::OutputDir`] when the directory cannot be
    /// created or opened.
    pub fn create(
        output_dir: &Utf8Path,
        started_at: DateTime<Utc>,
        trace: ConsoleTrace,
        console: Box<dyn Write + Send>,
    ) -> Result<Self, ReportError> {
        let output_error = |err: io::Error| ReportError::OutputDir {
            path: output_dir.to_path_buf(),
            message: err.to_string(),
        };
        Dir::create_ambient_dir_all(output_dir, ambient_authority()).map_err(output_error)?;
        let dir = Dir::open_ambient_dir(output_dir, ambient_authority()).map_err(output_error)?;
        let stamp = started_at.format("%Y%m%dT%H%M%SZ").to_string();

        let log = match create_unique(&dir, &format!("{FILE_PREFIX}-{stamp}"), "log") {
            Ok((name, file)) => Some((output_dir.join(name), file)),
            Err(err) => {
                warn!(dir = %output_dir, error = %err, "could not create run log");
                None
            }
        };

        Ok(Self {
            dir,
            dir_path: output_dir.to_path_buf(),
            stamp,
            trace,
            console: Some(console),
            log,
        })
    }

    /// Path of the run log, when it was created.
    #[must_use]
    pub fn log_path(&self) -> Option<&Utf8Path> {
        self.log.as_ref().map(|(path, _)| path.as_path())
    }

    /// Emits the trace lines for one completed script.
    pub fn script(&mut self, record: &ScriptRecord) {
        for line in self.trace.script_lines(record) {
            self.line(&line);
        }
    }

    /// Writes one line to the console and the log.
    pub fn line(&mut self, line: &str) {
        if let Some(console) = self.console.as_mut()
            && let Err(err) = writeln!(console, "{line}")
        {
            warn!(error = %err, "console write failed; continuing without console output");
            self.console = None;
        }
        if let Some((path, file)) = self.log.as_mut()
            && let Err(err) = writeln!(file, "{line}")
        {
            warn!(log = %path, error = %err, "log write failed; continuing without run log");
            self.log = None;
        }
    }

    /// Writes the summary and both copies of the JSON report.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when the report cannot be serialised or
    /// written.
    pub fn finish(mut self, report: &RunReport) -> Result<ReportPaths, ReportError> {
        for line in self.trace.summary_lines(report) {
            self.line(&line);
        }

        let mut json =
            serde_json::to_string_pretty(report).map_err(|err| ReportError::Serialise(err.to_string()))?;
        json.push('\n');

        let report_path = self.dir_path.join(REPORT_FILE);
        self.dir
            .write(REPORT_FILE, &json)
            .map_err(|err| write_error(&report_path, &err))?;

        let stem = format!("{FILE_PREFIX}-report-{}", self.stamp);
        let archive_path = create_unique(&self.dir, &stem, "json")
            .and_then(|(name, mut file)| {
                file.write_all(json.as_bytes())?;
                Ok(self.dir_path.join(name))
            })
            .map_err(|err| write_error(&self.dir_path.join(format!("{stem}.json")), &err))?;

        self.line(&format!("  report:    {report_path}"));
        let log = self.log.as_ref().map(|(path, _)| path.clone());
        if let Some(path) = &log {
            self.line(&format!("  log:       {path}"));
        }
        if let Some((path, file)) = self.log.as_mut()
            && let Err(err) = file.flush()
        {
            warn!(log = %path, error = %err, "failed to flush run log");
        }

        Ok(ReportPaths {
            log,
            report: report_path,
            archive: archive_path,
        })
    }
}

fn write_error(path: &Utf8Path, err: &io::Error) -> ReportError {
    ReportError::Write {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Creates `<stem>.<extension>`, or `<stem>-N.<extension>` when that name is
/// taken. Never truncates an existing file.
fn create_unique(dir: &Dir, stem: &str, extension: &str) -> io::Result<(String, File)> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    for suffix in 0..MAX_SUFFIX {
        let name = if suffix == 0 {
            format!("{stem}.{extension}")
        } else {
            format!("{stem}-{suffix}.{extension}")
        };
        match dir.open_with(&name, &options) {
            Ok(file) => return Ok((name, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {stem}.{extension}"),
    ))
}
