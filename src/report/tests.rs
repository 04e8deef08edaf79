use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::TimeZone;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::probe::InvocationMode;
use crate::report::emit::REPORT_FILE;
use crate::syntax::ParseError;

fn started_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
        .single()
        .expect("valid timestamp")
}

fn record(path: &str, syntax: SyntaxResult, execution: ExecutionResult) -> ScriptRecord {
    ScriptRecord {
        path: path.to_owned(),
        kind: ScriptKind::Shell,
        syntax,
        classification: None,
        execution,
        duration_ms: 5,
    }
}

fn passing(path: &str) -> ScriptRecord {
    let mut execution = ExecutionResult::pass("source-only invocation exited 0");
    execution.mode = Some(InvocationMode::SourceOnly);
    record(path, SyntaxResult::pass(), execution)
}

fn broken(path: &str) -> ScriptRecord {
    let mut error = ParseError::new("unexpected `fi`");
    error.line = Some(3);
    error.column = Some(1);
    record(
        path,
        SyntaxResult::from_errors(vec![error]),
        ExecutionResult::skipped("syntax validation failed"),
    )
}

fn aggregator(discovered: usize) -> Aggregator {
    Aggregator::new(
        Utf8PathBuf::from("/repo"),
        started_at(),
        RunMode::Full,
        discovered,
    )
}

#[test]
fn counters_balance_and_failures_set_exit_code() {
    let mut tally = aggregator(3);
    tally.record(passing("b.sh"));
    tally.record(broken("a.sh"));
    tally.record(record(
        "c.sh",
        SyntaxResult::pass(),
        ExecutionResult::fail("exited with status 1"),
    ));

    let report = tally.finish(false, Duration::from_millis(42));

    assert_eq!(report.total_scripts, 3);
    assert_eq!(report.passed_syntax + report.failed_syntax, report.total_scripts);
    assert_eq!(
        report.passed_execution + report.failed_execution + report.skipped_execution,
        report.total_scripts
    );
    assert_eq!(report.failed_syntax, 1);
    assert_eq!(report.failed_execution, 1);
    assert_eq!(report.exit_code, EXIT_FAILURES);
    assert_eq!(report.duration_ms, 42);
}

#[test]
fn records_are_sorted_regardless_of_arrival_order() {
    let mut forward = aggregator(2);
    forward.record(passing("a.sh"));
    forward.record(passing("b/c.sh"));
    let mut backward = aggregator(2);
    backward.record(passing("b/c.sh"));
    backward.record(passing("a.sh"));

    let left = forward.finish(false, Duration::ZERO);
    let right = backward.finish(false, Duration::ZERO);

    assert_eq!(left, right);
    assert!(left.succeeded());
}

#[rstest]
#[case::clean(false, EXIT_SUCCESS)]
#[case::cancelled(true, EXIT_FAILURES)]
fn cancellation_fails_an_otherwise_clean_run(#[case] cancelled: bool, #[case] expected: i32) {
    let mut tally = aggregator(2);
    tally.record(passing("a.sh"));
    let report = tally.finish(cancelled, Duration::ZERO);
    assert_eq!(report.exit_code, expected);
    assert_eq!(report.discovered_scripts, 2);
    assert_eq!(report.total_scripts, 1);
}

#[test]
fn report_serialises_with_camel_case_fields() {
    let mut tally = aggregator(1);
    tally.record(broken("a.sh"));
    let json = serde_json::to_value(tally.finish(false, Duration::ZERO)).expect("serialise");

    assert_eq!(json["rootPath"], "/repo");
    assert_eq!(json["startedAt"], "2026-03-14T09:26:53Z");
    assert_eq!(json["failedSyntax"], 1);
    assert_eq!(json["exitCode"], 1);
    assert_eq!(json["scripts"][0]["syntax"]["errors"][0]["line"], 3);
    assert_eq!(json["scripts"][0]["execution"]["outcome"], "skipped");
    assert_eq!(json["scripts"][0]["durationMs"], 5);
}

#[rstest]
#[case::quiet(false, vec![
    "[SYNTAX FAIL] a.sh: unexpected `fi`",
    "[EXEC SKIP] a.sh (syntax validation failed)",
])]
#[case::verbose(true, vec![
    "[SYNTAX FAIL] a.sh",
    "    3:1: unexpected `fi`",
    "[EXEC SKIP] a.sh (syntax validation failed)",
])]
fn console_lines_describe_each_stage(#[case] verbose: bool, #[case] expected: Vec<&str>) {
    assert_eq!(ConsoleTrace::new(verbose).script_lines(&broken("a.sh")), expected);
}

#[test]
fn verbose_trace_includes_command_and_output() {
    let mut failing = record(
        "x.sh",
        SyntaxResult::pass(),
        ExecutionResult::fail("boom"),
    );
    failing.execution.command = Some(String::from("sh x.sh --help"));
    failing.execution.output = Some(crate::test_support::output(Some(1), "", "boom\n"));

    let lines = ConsoleTrace::new(true).script_lines(&failing);

    assert_eq!(
        lines,
        [
            "[SYNTAX PASS] x.sh",
            "[EXEC FAIL] x.sh: boom",
            "    command: sh x.sh --help",
            "    stderr:",
            "    | boom",
        ]
    );
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
        String::from_utf8(bytes).expect("utf8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[fixture]
fn output_dir() -> (TempDir, Utf8PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("results")).expect("utf8 tempdir");
    (tmp, path)
}

fn finished_report() -> RunReport {
    let mut tally = aggregator(1);
    tally.record(passing("a.sh"));
    tally.finish(false, Duration::from_millis(7))
}

#[rstest]
fn writer_mirrors_console_to_log_and_writes_reports(output_dir: (TempDir, Utf8PathBuf)) {
    let (_tmp, dir) = output_dir;
    let console = SharedBuffer::default();
    let mut writer = ReportWriter::create(
        &dir,
        started_at(),
        ConsoleTrace::new(false),
        Box::new(console.clone()),
    )
    .expect("create writer");
    let report = finished_report();
    writer.script(report.scripts.first().expect("one record"));
    let paths = writer.finish(&report).expect("finish");

    assert_eq!(paths.report, dir.join(REPORT_FILE));
    assert_eq!(
        paths.archive,
        dir.join("provcheck-report-20260314T092653Z.json")
    );
    let log_path = paths.log.expect("log created");
    assert_eq!(log_path, dir.join("provcheck-20260314T092653Z.log"));

    let printed = console.contents();
    assert!(printed.starts_with("[SYNTAX PASS] a.sh\n[EXEC PASS] a.sh (source-only)\n"));
    assert!(printed.contains("result:    PASSED (exit 0)"));
    let logged = std::fs::read_to_string(&log_path).expect("read log");
    assert_eq!(logged, printed);

    let fixed = std::fs::read_to_string(&paths.report).expect("read report");
    let archived = std::fs::read_to_string(&paths.archive).expect("read archive");
    assert_eq!(fixed, archived);
    let parsed: serde_json::Value = serde_json::from_str(&fixed).expect("valid json");
    assert_eq!(parsed["totalScripts"], 1);
}

#[rstest]
fn timestamped_files_are_never_overwritten(output_dir: (TempDir, Utf8PathBuf)) {
    let (_tmp, dir) = output_dir;
    let report = finished_report();
    let first = ReportWriter::create(&dir, started_at(), ConsoleTrace::default(), Box::new(std::io::sink()))
        .expect("first writer")
        .finish(&report)
        .expect("first finish");
    let second = ReportWriter::create(&dir, started_at(), ConsoleTrace::default(), Box::new(std::io::sink()))
        .expect("second writer")
        .finish(&report)
        .expect("second finish");

    assert_ne!(first.archive, second.archive);
    assert_ne!(first.log, second.log);
    assert_eq!(
        second.archive,
        dir.join("provcheck-report-20260314T092653Z-1.json")
    );
    assert_eq!(first.report, second.report);
}

struct BrokenConsole;

impl Write for BrokenConsole {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("closed"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::other("closed"))
    }
}

#[rstest]
fn console_failures_do_not_stop_the_report(output_dir: (TempDir, Utf8PathBuf)) {
    let (_tmp, dir) = output_dir;
    let writer = ReportWriter::create(&dir, started_at(), ConsoleTrace::default(), Box::new(BrokenConsole))
        .expect("writer");
    let paths = writer.finish(&finished_report()).expect("report still written");
    assert!(paths.report.exists());
}

#[test]
fn unusable_output_directory_is_an_error() {
    let tmp = TempDir::new().expect("tempdir");
    let file = Utf8PathBuf::from_path_buf(tmp.path().join("occupied")).expect("utf8");
    std::fs::write(&file, "not a directory").expect("write");

    let err = ReportWriter::create(&file, started_at(), ConsoleTrace::default(), Box::new(std::io::sink()))
        .expect_err("file is not a directory");
    assert!(matches!(err, ReportError::OutputDir { .. }), "{err}");
}
