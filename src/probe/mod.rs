//! Execution probing.
//!
//! An [`ExecutionProber`] exercises an executable script in the least
//! invasive way the script supports and turns the interpreter's verdict into
//! an [`ExecutionResult`]. Process handling sits behind [`ProbeRunner`] so
//! tests can substitute a scripted runner.

mod plan;
mod runner;

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::script::ScriptUnit;

pub use plan::{
    Invocation, InvocationMode, ProberSettings, build, select_mode, shebang_interpreter,
};
pub use runner::{
    PROBE_ENV_VAR, ProbeError, ProbeFuture, ProbeOutput, ProbeRunner, ProcessProbeRunner,
};

/// Longest failure message copied from captured output, in characters.
const MAX_MESSAGE_CHARS: usize = 1_000;

/// Note attached to every source-only record.
pub const SOURCE_ONLY_NOTE: &str =
    "no dry-run or help entry point; the interpreter parsed the script without running its body";

/// Verdict of the execution stage.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionOutcome {
    /// The invocation exited with status zero.
    Pass,
    /// The invocation failed, timed out, or could not be started.
    Fail,
    /// The script was not executed.
    Skipped,
}

impl ExecutionOutcome {
    /// Short label used in console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIP",
        }
    }
}

/// Outcome of the execution stage for one script.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Pass, fail, or skipped.
    pub outcome: ExecutionOutcome,
    /// Human-readable detail: skip reason, failure text, or pass summary.
    pub message: String,
    /// Set when the invocation was killed at its timeout.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    /// Invocation mode, when the script was run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<InvocationMode>,
    /// Rendered interpreter command, when the script was run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Caveat about the invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Captured process output, shown in verbose console traces.
    #[serde(skip)]
    pub output: Option<ProbeOutput>,
}

impl ExecutionResult {
    fn with_outcome(outcome: ExecutionOutcome, message: String) -> Self {
        Self {
            outcome,
            message,
            timed_out: false,
            mode: None,
            command: None,
            note: None,
            output: None,
        }
    }

    /// A passing result.
    #[must_use]
    pub fn pass(message: impl Into<String>) -> Self {
        Self::with_outcome(ExecutionOutcome::Pass, message.into())
    }

    /// A failing result.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::with_outcome(ExecutionOutcome::Fail, message.into())
    }

    /// A skipped result carrying its reason.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::with_outcome(ExecutionOutcome::Skipped, reason.into())
    }

    /// Console label, distinguishing timeouts from other failures.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        if self.timed_out {
            "FAIL:TIMEOUT"
        } else {
            self.outcome.label()
        }
    }
}

/// Runs the safe invocation for executable scripts.
#[derive(Debug)]
pub struct ExecutionProber<R> {
    runner: R,
    settings: ProberSettings,
}

impl<R: ProbeRunner> ExecutionProber<R> {
    /// Creates a prober over `runner`.
    #[must_use]
    pub const fn new(runner: R, settings: ProberSettings) -> Self {
        Self { runner, settings }
    }

    /// Interpreters and timeout in effect.
    #[must_use]
    pub const fn settings(&self) -> &ProberSettings {
        &self.settings
    }

    /// Resolves the invocation that [`Self::probe`] would run.
    #[must_use]
    pub fn plan(&self, script: &ScriptUnit, source: &str) -> Invocation {
        let mode = select_mode(script.kind(), source);
        build(script, source, mode, &self.settings)
    }

    /// Runs the planned invocation and interprets its exit status.
    ///
    /// The caller is responsible for only probing scripts classified as
    /// executable.
    pub async fn probe(&self, script: &ScriptUnit, source: &str) -> ExecutionResult {
        let invocation = self.plan(script, source);
        let command = invocation.render();
        debug!(
            script = %script.relative_path(),
            mode = %invocation.mode,
            command = %command,
            "probing script"
        );

        let started = Instant::now();
        let outcome = self.runner.run(&invocation).await;
        debug!(
            script = %script.relative_path(),
            elapsed_ms = started.elapsed().as_millis(),
            "probe finished"
        );

        let mut result = match outcome {
            Ok(output) if output.is_success() => {
                let mut passed =
                    ExecutionResult::pass(format!("{} invocation exited 0", invocation.mode));
                passed.output = Some(output);
                passed
            }
            Ok(output) => {
                let mut failed = ExecutionResult::fail(failure_message(&output));
                failed.output = Some(output);
                failed
            }
            Err(err @ ProbeError::Timeout { .. }) => {
                let mut failed = ExecutionResult::fail(err.to_string());
                failed.timed_out = true;
                failed
            }
            Err(err) => ExecutionResult::fail(err.to_string()),
        };
        result.mode = Some(invocation.mode);
        result.command = Some(command);
        if invocation.mode == InvocationMode::SourceOnly {
            result.note = Some(String::from(SOURCE_ONLY_NOTE));
        }
        result
    }
}

/// Chooses the most informative text for a failed invocation: stderr, then
/// stdout, then the exit status.
fn failure_message(output: &ProbeOutput) -> String {
    let captured = [output.stderr.trim(), output.stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty());
    match (captured, output.code) {
        (Some(text), _) => truncate(text),
        (None, Some(code)) => format!("exited with status {code}"),
        (None, None) => String::from("terminated by a signal"),
    }
}

fn truncate(text: &str) -> String {
    let mut chars = text.chars();
    let mut kept: String = chars.by_ref().take(MAX_MESSAGE_CHARS).collect();
    if chars.next().is_some() {
        kept.push_str("...");
    }
    kept
}
