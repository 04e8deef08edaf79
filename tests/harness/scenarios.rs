//! BDD scenarios for complete harness runs.

use rstest_bdd_macros::scenario;

use super::test_helpers::{HarnessContext, harness_context};

#[scenario(
    path = "tests/features/harness.feature",
    name = "A valid script passes syntax and execution"
)]
fn scenario_valid_script(harness_context: HarnessContext) {
    drop(harness_context);
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "A syntax error fails the run and suppresses execution"
)]
fn scenario_syntax_error(harness_context: HarnessContext) {
    drop(harness_context);
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "Syntax-only runs never invoke an interpreter"
)]
fn scenario_syntax_only(harness_context: HarnessContext) {
    drop(harness_context);
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "A missing root is a discovery failure"
)]
fn scenario_missing_root(harness_context: HarnessContext) {
    drop(harness_context);
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "Unsafe scripts are skipped with their reason"
)]
fn scenario_unsafe_scripts(harness_context: HarnessContext) {
    drop(harness_context);
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "A failing script run fails the run"
)]
fn scenario_failing_script_run(harness_context: HarnessContext) {
    drop(harness_context);
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "A cancelled run still writes a report"
)]
fn scenario_cancelled_run(harness_context: HarnessContext) {
    drop(harness_context);
}
