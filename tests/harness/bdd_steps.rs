//! BDD step definitions for complete harness runs.

use std::fs::read_to_string;
use std::io;
use std::sync::Arc;

use provcheck::harness::Harness;
use provcheck::privilege::FixedPrivilege;
use provcheck::report::RunMode;
use provcheck::test_support::{ScriptedProbeRunner, output};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{
    CompletedRun, HarnessContext, HarnessResult, HarnessTestError, script_body, write_script,
};
use crate::test_constants::REPORT_FILE;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] HarnessTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a \"{flavour}\" script named \"{name}\"")]
fn script_in_tree(
    harness_context: HarnessContext,
    flavour: String,
    name: String,
) -> Result<HarnessContext, StepError> {
    let body = script_body(&flavour)?;
    write_script(&harness_context.root, &name, body)?;
    Ok(harness_context)
}

#[given("execution is disabled")]
fn execution_disabled(mut harness_context: HarnessContext) -> HarnessContext {
    harness_context.mode = RunMode::SyntaxOnly;
    harness_context
}

#[given("the root path does not exist")]
fn missing_root(mut harness_context: HarnessContext) -> HarnessContext {
    harness_context.root = harness_context.root.join("absent");
    harness_context
}

#[given("running \"{name}\" exits with code \"{code}\"")]
fn script_run_fails(mut harness_context: HarnessContext, name: String, code: i32) -> HarnessContext {
    harness_context.failing.push((name, code));
    harness_context
}

#[given("the run is cancelled before it starts")]
fn cancelled_run(mut harness_context: HarnessContext) -> HarnessContext {
    harness_context.cancelled = true;
    harness_context
}

#[when("I check the script tree")]
fn check_tree(harness_context: HarnessContext) -> Result<HarnessContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let runner = ScriptedProbeRunner::new();
    for (name, code) in &harness_context.failing {
        runner.respond_to(
            name.as_str(),
            Ok(output(Some(*code), "", "simulated provisioning failure")),
        );
    }
    let harness = Harness::new(
        harness_context.settings(),
        runner.clone(),
        Arc::new(FixedPrivilege(true)),
    );
    let cancel = CancellationToken::new();
    if harness_context.cancelled {
        cancel.cancel();
    }

    let result = runtime.block_on(async move { harness.run(Box::new(io::sink()), cancel).await });
    let outcome = match result {
        Ok(outcome) => HarnessResult::Completed(CompletedRun {
            exit_code: outcome.report.exit_code,
            cancelled: outcome.report.cancelled,
            report_path: outcome.paths.report,
            messages: outcome
                .report
                .scripts
                .into_iter()
                .map(|record| (record.path, record.execution.message))
                .collect(),
            invocations: runner.invocations().len(),
        }),
        Err(err) => HarnessResult::Failed {
            exit_code: err.exit_code(),
            message: err.to_string(),
        },
    };

    Ok(HarnessContext {
        outcome: Some(outcome),
        ..harness_context
    })
}

fn completed(harness_context: &HarnessContext) -> Result<&CompletedRun, StepError> {
    match &harness_context.outcome {
        Some(HarnessResult::Completed(run)) => Ok(run),
        Some(HarnessResult::Failed { message, .. }) => Err(StepError::Assertion(format!(
            "expected a completed run, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the run exits with code \"{code}\"")]
fn run_exit_code(harness_context: &HarnessContext, code: i32) -> Result<(), StepError> {
    let Some(outcome) = &harness_context.outcome else {
        return Err(StepError::Assertion(String::from("missing outcome")));
    };
    if outcome.exit_code() == code {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected exit code {code}, got {}",
            outcome.exit_code()
        )))
    }
}

#[then("the \"{counter}\" count is \"{value}\"")]
fn report_counter(
    harness_context: &HarnessContext,
    counter: String,
    value: u64,
) -> Result<(), StepError> {
    let run = completed(harness_context)?;
    let raw = read_to_string(&run.report_path)
        .map_err(|err| StepError::Assertion(format!("read {}: {err}", run.report_path)))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| StepError::Assertion(format!("report is not JSON: {err}")))?;
    let found = json.get(&counter).and_then(serde_json::Value::as_u64);
    if found == Some(value) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {counter} to be {value}, got {found:?}"
        )))
    }
}

#[then("no interpreter was invoked")]
fn no_invocations(harness_context: &HarnessContext) -> Result<(), StepError> {
    let run = completed(harness_context)?;
    if run.invocations == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no invocations, got {}",
            run.invocations
        )))
    }
}

#[then("no report is written")]
fn no_report(harness_context: &HarnessContext) -> Result<(), StepError> {
    let report = harness_context.output_dir.join(REPORT_FILE);
    if harness_context.output_dir.exists() || report.exists() {
        Err(StepError::Assertion(format!(
            "expected no artefacts under {}",
            harness_context.output_dir
        )))
    } else {
        Ok(())
    }
}

#[then("the skip reason for \"{name}\" mentions \"{text}\"")]
fn skip_reason(harness_context: &HarnessContext, name: String, text: String) -> Result<(), StepError> {
    let run = completed(harness_context)?;
    let (_, message) = run
        .messages
        .iter()
        .find(|(path, _)| *path == name)
        .ok_or_else(|| StepError::Assertion(format!("no record for {name}")))?;
    if message.contains(&text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected skip reason for {name} to mention {text}, got {message}"
        )))
    }
}

#[then("the report is marked cancelled")]
fn report_cancelled(harness_context: &HarnessContext) -> Result<(), StepError> {
    let run = completed(harness_context)?;
    if run.cancelled && run.report_path.exists() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "expected a cancelled report on disk",
        )))
    }
}
