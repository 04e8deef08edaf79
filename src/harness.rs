//! End-to-end harness runs.
//!
//! A run discovers scripts, checks each one on a bounded pool of tokio tasks,
//! and streams finished records over a channel to a single aggregation task
//! that owns both the tallies and the report writer. Cancellation stops new
//! scripts from being scheduled; scripts already in flight run to completion
//! or to their probe timeout.

use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{CloudPatterns, classify};
use crate::discover::{DiscoveryError, DiscoveryOptions, discover};
use crate::privilege::PrivilegeProbe;
use crate::probe::{ExecutionProber, ExecutionResult, ProbeRunner, ProberSettings};
use crate::report::{
    Aggregator, ConsoleTrace, EXIT_DISCOVERY, EXIT_USAGE, ReportError, ReportPaths, ReportWriter,
    RunMode, RunReport, ScriptRecord, millis,
};
use crate::script::ScriptUnit;
use crate::syntax::{ParseError, SyntaxResult, validate};

/// Reason recorded for every script in syntax-only mode.
pub const EXECUTION_DISABLED: &str = "execution disabled";

/// Validated inputs for a run.
#[derive(Clone, Debug)]
pub struct HarnessSettings {
    /// Directory searched for scripts.
    pub root: Utf8PathBuf,
    /// Exclusion globs.
    pub exclude: Vec<String>,
    /// Script extensions to discover.
    pub extensions: Vec<String>,
    /// Full or syntax-only.
    pub mode: RunMode,
    /// Verbose console trace.
    pub verbose: bool,
    /// Maximum scripts checked at once.
    pub concurrency: NonZeroUsize,
    /// Directory receiving the log and reports.
    pub output_dir: Utf8PathBuf,
    /// Interpreters and timeout for execution probes.
    pub prober: ProberSettings,
    /// Cloud-dependence signals.
    pub cloud_patterns: CloudPatterns,
}

/// Errors that stop a run before a report is produced.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Discovery failed; nothing was checked.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// The output directory or report could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl HarnessError {
    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Discovery(_) => EXIT_DISCOVERY,
            Self::Report(_) => EXIT_USAGE,
        }
    }
}

/// A completed run and the files it wrote.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Aggregated results.
    pub report: RunReport,
    /// Artefact locations.
    pub paths: ReportPaths,
}

/// Per-script pipeline shared by all workers.
struct Checker<R> {
    mode: RunMode,
    prober: ExecutionProber<R>,
    privilege: Arc<dyn PrivilegeProbe>,
    cloud_patterns: CloudPatterns,
}

impl<R: ProbeRunner> Checker<R> {
    async fn check(&self, script: &ScriptUnit) -> ScriptRecord {
        let started = Instant::now();
        let source = match script.read_source() {
            Ok(source) => source,
            Err(err) => {
                warn!(script = %script.relative_path(), error = %err, "failed to read script");
                let message = format!("failed to read script: {err}");
                return aborted(script, &message, started);
            }
        };

        let syntax = validate(script.kind(), &source);
        let (classification, execution) = match self.mode {
            RunMode::SyntaxOnly => (None, ExecutionResult::skipped(EXECUTION_DISABLED)),
            RunMode::Full => {
                let verdict = classify(
                    script,
                    &source,
                    &syntax,
                    self.privilege.as_ref(),
                    &self.cloud_patterns,
                );
                let execution = match verdict.reason() {
                    None => self.prober.probe(script, &source).await,
                    Some(reason) => ExecutionResult::skipped(reason),
                };
                (Some(verdict), execution)
            }
        };

        let duration_ms = millis(started.elapsed());
        debug!(
            script = %script.relative_path(),
            syntax = ?syntax.outcome,
            execution = execution.label(),
            elapsed_ms = duration_ms,
            "script checked"
        );
        ScriptRecord {
            path: script.relative_path().to_owned(),
            kind: script.kind(),
            syntax,
            classification,
            execution,
            duration_ms,
        }
    }
}

/// Record for a script whose check could not complete.
fn aborted(script: &ScriptUnit, message: &str, started: Instant) -> ScriptRecord {
    ScriptRecord {
        path: script.relative_path().to_owned(),
        kind: script.kind(),
        syntax: SyntaxResult::from_errors(vec![ParseError::new(message)]),
        classification: None,
        execution: ExecutionResult::fail(message),
        duration_ms: millis(started.elapsed()),
    }
}

/// Runs the discovery, checking, aggregation, and reporting pipeline.
pub struct Harness<R> {
    settings: HarnessSettings,
    checker: Arc<Checker<R>>,
}

impl<R> std::fmt::Debug for Harness<R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Harness")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<R: ProbeRunner + 'static> Harness<R> {
    /// Creates a harness that probes scripts through `runner`.
    #[must_use]
    pub fn new(settings: HarnessSettings, runner: R, privilege: Arc<dyn PrivilegeProbe>) -> Self {
        let checker = Checker {
            mode: settings.mode,
            prober: ExecutionProber::new(runner, settings.prober.clone()),
            privilege,
            cloud_patterns: settings.cloud_patterns.clone(),
        };
        Self {
            settings,
            checker: Arc::new(checker),
        }
    }

    /// Settings in effect for this harness.
    #[must_use]
    pub const fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Executes one run, streaming the console trace to `console`.
    ///
    /// Discovery happens before the output directory is touched, so a
    /// discovery failure leaves no artefacts behind.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Discovery`] when discovery fails and
    /// [`HarnessError::Report`] when the output directory or report cannot be
    /// written. Script failures are reported through [`RunReport`] instead.
    pub async fn run(
        &self,
        console: Box<dyn Write + Send>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, HarnessError> {
        let started_at = Utc::now();
        let started = Instant::now();

        let options = DiscoveryOptions::new(&self.settings.exclude, &self.settings.extensions)?;
        let scripts = discover(&self.settings.root, &options)?;
        let root_path = self
            .settings
            .root
            .canonicalize_utf8()
            .unwrap_or_else(|_| self.settings.root.clone());
        info!(root = %root_path, scripts = scripts.len(), mode = ?self.settings.mode, "starting run");

        let writer = ReportWriter::create(
            &self.settings.output_dir,
            started_at,
            ConsoleTrace::new(self.settings.verbose),
            console,
        )?;
        let aggregator = Aggregator::new(root_path, started_at, self.settings.mode, scripts.len());

        let (sender, mut receiver) = mpsc::channel::<ScriptRecord>(self.settings.concurrency.get());
        let collector = tokio::spawn(async move {
            let mut tally = aggregator;
            let mut output = writer;
            while let Some(record) = receiver.recv().await {
                output.script(&record);
                tally.record(record);
            }
            (tally, output)
        });

        self.schedule(scripts, &sender, &cancel).await;
        drop(sender);

        let (tally, output) = collector.await.map_err(|err| {
            ReportError::Write {
                path: self.settings.output_dir.clone(),
                message: format!("report aggregation task failed: {err}"),
            }
        })?;
        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(completed = tally.completed(), "run cancelled before all scripts were checked");
        }
        let report = tally.finish(cancelled, started.elapsed());
        let paths = output.finish(&report)?;
        info!(exit_code = report.exit_code, report = %paths.report, "run complete");
        Ok(RunOutcome { report, paths })
    }

    async fn schedule(
        &self,
        scripts: Vec<ScriptUnit>,
        sender: &mpsc::Sender<ScriptRecord>,
        cancel: &CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.get()));
        let mut workers = JoinSet::new();

        for script in scripts {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                acquired = Arc::clone(&permits).acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let checker = Arc::clone(&self.checker);
            let records = sender.clone();
            workers.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let unit = script.clone();
                let record = match tokio::spawn(async move { checker.check(&unit).await }).await {
                    Ok(record) => record,
                    Err(err) => panicked(&script, &err, started),
                };
                if records.send(record).await.is_err() {
                    warn!(script = %script.relative_path(), "aggregator closed before record was delivered");
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "worker task failed");
            }
        }
    }
}

fn panicked(script: &ScriptUnit, err: &JoinError, started: Instant) -> ScriptRecord {
    warn!(script = %script.relative_path(), error = %err, "script check panicked");
    aborted(script, &format!("internal error while checking script: {err}"), started)
}
