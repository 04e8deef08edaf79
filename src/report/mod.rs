//! Run results and their aggregation.
//!
//! Workers produce one [`ScriptRecord`] per script. A single [`Aggregator`]
//! owns the tallies, so counters are only ever updated in one place, and
//! [`Aggregator::finish`] produces the immutable [`RunReport`].

pub mod emit;

use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::Classification;
use crate::probe::{ExecutionOutcome, ExecutionResult};
use crate::script::ScriptKind;
use crate::syntax::SyntaxResult;

pub use emit::{ConsoleTrace, ReportError, ReportPaths, ReportWriter};

/// Every script passed (or was skipped) and the run was not cancelled.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one syntax or execution failure, or the run was cancelled.
pub const EXIT_FAILURES: i32 = 1;
/// Discovery failed; no report was written.
pub const EXIT_DISCOVERY: i32 = 2;
/// Configuration, usage, or report-writing error.
pub const EXIT_USAGE: i32 = 3;

/// Whether scripts were executed after validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    /// Syntax validation followed by execution probing.
    Full,
    /// Syntax validation only.
    SyntaxOnly,
}

/// Everything known about one completed script.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRecord {
    /// Path relative to the run root.
    pub path: String,
    /// Script dialect.
    pub kind: ScriptKind,
    /// Syntax stage outcome.
    pub syntax: SyntaxResult,
    /// Classifier verdict, absent when execution was disabled or the source
    /// could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Execution stage outcome.
    pub execution: ExecutionResult,
    /// Wall-clock time spent on this script.
    pub duration_ms: u64,
}

/// Aggregated outcome of one harness run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Canonical discovery root.
    pub root_path: Utf8PathBuf,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock time.
    pub duration_ms: u64,
    /// Whether execution probing was enabled.
    pub mode: RunMode,
    /// Set when the run was interrupted before every script completed.
    pub cancelled: bool,
    /// Scripts found by discovery.
    pub discovered_scripts: usize,
    /// Scripts that completed and appear in `scripts`.
    pub total_scripts: usize,
    /// Scripts whose syntax validation passed.
    pub passed_syntax: usize,
    /// Scripts whose syntax validation failed.
    pub failed_syntax: usize,
    /// Scripts whose execution probe passed.
    pub passed_execution: usize,
    /// Scripts whose execution probe failed.
    pub failed_execution: usize,
    /// Scripts that were not executed.
    pub skipped_execution: usize,
    /// Process exit code for this run.
    pub exit_code: i32,
    /// Per-script records sorted by path.
    pub scripts: Vec<ScriptRecord>,
}

impl RunReport {
    /// Returns `true` when the run should be reported as successful.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

/// Sole owner of the in-progress report.
#[derive(Debug)]
pub struct Aggregator {
    root_path: Utf8PathBuf,
    started_at: DateTime<Utc>,
    mode: RunMode,
    discovered: usize,
    passed_syntax: usize,
    failed_syntax: usize,
    passed_execution: usize,
    failed_execution: usize,
    skipped_execution: usize,
    records: Vec<ScriptRecord>,
}

impl Aggregator {
    /// Starts aggregating a run over `discovered` scripts.
    #[must_use]
    pub fn new(
        root_path: Utf8PathBuf,
        started_at: DateTime<Utc>,
        mode: RunMode,
        discovered: usize,
    ) -> Self {
        Self {
            root_path,
            started_at,
            mode,
            discovered,
            passed_syntax: 0,
            failed_syntax: 0,
            passed_execution: 0,
            failed_execution: 0,
            skipped_execution: 0,
            records: Vec::with_capacity(discovered),
        }
    }

    /// Folds one completed script into the tallies.
    pub fn record(&mut self, record: ScriptRecord) {
        if record.syntax.passed() {
            self.passed_syntax += 1;
        } else {
            self.failed_syntax += 1;
        }
        match record.execution.outcome {
            ExecutionOutcome::Pass => self.passed_execution += 1,
            ExecutionOutcome::Fail => self.failed_execution += 1,
            ExecutionOutcome::Skipped => self.skipped_execution += 1,
        }
        self.records.push(record);
    }

    /// Number of records received so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.records.len()
    }

    /// Seals the report.
    ///
    /// Records are sorted by path so that the output does not depend on the
    /// order in which workers finished.
    #[must_use]
    pub fn finish(mut self, cancelled: bool, elapsed: Duration) -> RunReport {
        self.records.sort_by(|left, right| left.path.cmp(&right.path));
        let failed = self.failed_syntax > 0 || self.failed_execution > 0 || cancelled;
        RunReport {
            root_path: self.root_path,
            started_at: self.started_at,
            duration_ms: millis(elapsed),
            mode: self.mode,
            cancelled,
            discovered_scripts: self.discovered,
            total_scripts: self.records.len(),
            passed_syntax: self.passed_syntax,
            failed_syntax: self.failed_syntax,
            passed_execution: self.passed_execution,
            failed_execution: self.failed_execution,
            skipped_execution: self.skipped_execution,
            exit_code: if failed { EXIT_FAILURES } else { EXIT_SUCCESS },
            scripts: self.records,
        }
    }
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
#[must_use]
pub fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
