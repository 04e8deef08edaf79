//! Shared fixtures for harness BDD scenarios.

use std::fs::{create_dir_all, write};
use std::num::NonZeroUsize;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use provcheck::CloudPatterns;
use provcheck::harness::HarnessSettings;
use provcheck::probe::ProberSettings;
use provcheck::report::RunMode;
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;

use crate::test_constants::{BROKEN_SCRIPT, CLOUD_SCRIPT, PARAMETERISED_SCRIPT, VALID_SCRIPT};

#[derive(Clone, Debug)]
pub struct HarnessContext {
    pub root: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub mode: RunMode,
    /// Scripts whose interpreter run should exit with the given code.
    pub failing: Vec<(String, i32)>,
    pub cancelled: bool,
    pub outcome: Option<HarnessResult>,
    pub _workspace: Arc<TempDir>,
}

impl HarnessContext {
    /// Settings for a run over this context's tree.
    pub fn settings(&self) -> HarnessSettings {
        HarnessSettings {
            root: self.root.clone(),
            exclude: Vec::new(),
            extensions: vec![String::from("sh"), String::from("ps1")],
            mode: self.mode,
            verbose: false,
            concurrency: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
            output_dir: self.output_dir.clone(),
            prober: ProberSettings::default(),
            cloud_patterns: CloudPatterns::builtin(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletedRun {
    pub exit_code: i32,
    pub cancelled: bool,
    pub report_path: Utf8PathBuf,
    /// `(path, execution message)` for every record.
    pub messages: Vec<(String, String)>,
    pub invocations: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HarnessResult {
    Completed(CompletedRun),
    Failed { exit_code: i32, message: String },
}

impl HarnessResult {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(run) => run.exit_code,
            Self::Failed { exit_code, .. } => *exit_code,
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum HarnessTestError {
    #[error("invalid harness fixture: {0}")]
    Fixture(String),
}

pub type HarnessContextResult = Result<HarnessContext, HarnessTestError>;

#[fixture]
pub fn harness_context_result() -> HarnessContextResult {
    build_harness_context()
}

#[fixture]
pub fn harness_context(harness_context_result: HarnessContextResult) -> HarnessContext {
    harness_context_result
        .unwrap_or_else(|err| panic!("harness context fixture should initialise: {err}"))
}

fn build_harness_context() -> HarnessContextResult {
    let workspace =
        TempDir::new().map_err(|err| HarnessTestError::Fixture(format!("tempdir: {err}")))?;
    let base = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf())
        .map_err(|path| HarnessTestError::Fixture(format!("non-utf8 tempdir: {}", path.display())))?;
    let root = base.join("scripts");
    create_dir_all(&root)
        .map_err(|err| HarnessTestError::Fixture(format!("create {root}: {err}")))?;

    Ok(HarnessContext {
        root,
        output_dir: base.join("test-results"),
        mode: RunMode::Full,
        failing: Vec::new(),
        cancelled: false,
        outcome: None,
        _workspace: Arc::new(workspace),
    })
}

/// Maps a scenario script flavour onto its fixture body.
pub fn script_body(flavour: &str) -> Result<&'static str, HarnessTestError> {
    match flavour {
        "valid" => Ok(VALID_SCRIPT),
        "broken" => Ok(BROKEN_SCRIPT),
        "cloud" => Ok(CLOUD_SCRIPT),
        "parameterised" => Ok(PARAMETERISED_SCRIPT),
        other => Err(HarnessTestError::Fixture(format!(
            "unknown script flavour: {other}"
        ))),
    }
}

pub fn write_script(root: &Utf8Path, name: &str, body: &str) -> Result<(), HarnessTestError> {
    let path = root.join(name);
    write(&path, body).map_err(|err| HarnessTestError::Fixture(format!("write {path}: {err}")))
}
