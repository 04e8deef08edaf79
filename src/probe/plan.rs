//! Invocation planning: mode selection and command construction.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use shell_escape::unix::escape;

use crate::script::{ScriptKind, ScriptUnit};

/// Least invasive way of exercising a script, in preference order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InvocationMode {
    /// The script's own dry-run switch (`--dry-run`, `-WhatIf`).
    DryRun,
    /// The script's help output (`--help`, `Get-Help -Full`).
    Help,
    /// The interpreter loads and parses the script without running it.
    SourceOnly,
}

impl InvocationMode {
    /// Short label used in console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::Help => "help",
            Self::SourceOnly => "source-only",
        }
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// A fully resolved interpreter invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// Interpreter executable.
    pub program: String,
    /// Arguments passed to the interpreter.
    pub args: Vec<String>,
    /// Mode the invocation implements.
    pub mode: InvocationMode,
    /// Hard limit on wall-clock time.
    pub timeout: Duration,
}

impl Invocation {
    /// Renders the invocation as a copy-pasteable shell command.
    #[must_use]
    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| escape(Cow::Borrowed(part)).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Interpreters and timeout used to build invocations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProberSettings {
    /// Shell used when a script carries no recognised shebang.
    pub shell_bin: String,
    /// PowerShell executable.
    pub pwsh_bin: String,
    /// Per-invocation timeout.
    pub timeout: Duration,
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            shell_bin: String::from("sh"),
            pwsh_bin: String::from("pwsh"),
            timeout: Duration::from_secs(60),
        }
    }
}

const SHELL_DRY_RUN_FLAG: &str = "--(?:dry-run|dryrun|what-if)";
const SHELL_HELP_FLAG: &str = "(?:-h|--help)";
const FLAG_TOKEN: &str = r#"["']?-{1,2}[A-Za-z0-9][\w-]*["']?"#;

/// A `case` arm whose pattern list includes `flag`, e.g. `-h|--help)`.
fn case_arm(flag: &str) -> String {
    format!(
        r#"(?m)(?:^|\bin\b|;;)\s*\(?\s*(?:{FLAG_TOKEN}\s*\|\s*)*["']?{flag}["']?(?:\s*\|\s*{FLAG_TOKEN})*\s*\)"#
    )
}

/// A `test` comparing a variable with `flag`, e.g. `[ "$1" = --help ]`.
fn flag_test(flag: &str) -> String {
    format!(r#"\[\[?\s*["']?\$\{{?[\w@*]+\}}?["']?\s*==?\s*["']?{flag}["']?\s*\]"#)
}

fn compile_all<I: IntoIterator<Item = String>>(patterns: I) -> Vec<Regex> {
    patterns
        .into_iter()
        .filter_map(|pattern| Regex::new(&pattern).ok())
        .collect()
}

static SHELL_DRY_RUN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all([case_arm(SHELL_DRY_RUN_FLAG), flag_test(SHELL_DRY_RUN_FLAG)])
});
static SHELL_HELP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all([
        case_arm(SHELL_HELP_FLAG),
        flag_test(SHELL_HELP_FLAG),
        String::from(r#"\bgetopts\s+["']?:?[A-Za-z:]*h"#),
    ])
});
static PWSH_SHOULD_PROCESS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile_all([String::from(r"(?i)\bSupportsShouldProcess\b")]));
static PWSH_HELP: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile_all([String::from(r"(?im)^\s*\.(?:SYNOPSIS|DESCRIPTION)\b")]));

fn matches(patterns: &[Regex], source: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(source))
}

/// Drops shell comments so that flags mentioned in prose are not mistaken for
/// argument handling. Quoting is tracked per line only.
fn strip_shell_comments(source: &str) -> String {
    let mut kept = String::with_capacity(source.len());
    for line in source.lines() {
        let mut quote = None;
        let mut previous = ' ';
        for ch in line.chars() {
            match (quote, ch) {
                (None, '#') if previous.is_whitespace() => break,
                (None, '\'' | '"') => quote = Some(ch),
                (Some(open), _) if ch == open => quote = None,
                _ => {}
            }
            kept.push(ch);
            previous = ch;
        }
        kept.push('\n');
    }
    kept
}

/// Picks the first applicable mode in preference order.
///
/// Shell scripts only qualify for dry-run or help when they handle the flag
/// themselves: a `case` arm, a `test` against a variable, or `getopts` with
/// `h`. A flag passed to some other command (`df -h`, `apt-get --dry-run`)
/// does not count.
#[must_use]
pub fn select_mode(kind: ScriptKind, source: &str) -> InvocationMode {
    let (dry_run, help, text) = match kind {
        ScriptKind::Shell => (
            SHELL_DRY_RUN.as_slice(),
            SHELL_HELP.as_slice(),
            Cow::Owned(strip_shell_comments(source)),
        ),
        ScriptKind::PowerShell => (
            PWSH_SHOULD_PROCESS.as_slice(),
            PWSH_HELP.as_slice(),
            Cow::Borrowed(source),
        ),
    };
    if matches(dry_run, &text) {
        InvocationMode::DryRun
    } else if matches(help, &text) {
        InvocationMode::Help
    } else {
        InvocationMode::SourceOnly
    }
}

const KNOWN_SHELLS: [&str; 5] = ["sh", "bash", "dash", "ksh", "zsh"];

/// Interpreter named by a `#!` line, if it is a known shell.
///
/// Handles both direct paths (`#!/bin/bash -e`) and `env` forms
/// (`#!/usr/bin/env -S bash -eu`).
#[must_use]
pub fn shebang_interpreter(source: &str) -> Option<&'static str> {
    let first = source.lines().next()?.strip_prefix("#!")?;
    let mut words = first.split_whitespace();
    let mut program = words.next()?;
    if basename(program) == "env" {
        program = words.find(|word| !word.starts_with('-'))?;
    }
    let name = basename(program);
    KNOWN_SHELLS.into_iter().find(|known| *known == name)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Quotes `value` as a PowerShell single-quoted literal.
fn ps_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

const PWSH_FLAGS: [&str; 3] = ["-NoLogo", "-NoProfile", "-NonInteractive"];

/// Builds the invocation for `script` in `mode`.
#[must_use]
pub fn build(
    script: &ScriptUnit,
    source: &str,
    mode: InvocationMode,
    settings: &ProberSettings,
) -> Invocation {
    let path = script.path().as_str().to_owned();
    let (program, args) = match script.kind() {
        ScriptKind::Shell => {
            let program = shebang_interpreter(source)
                .map_or_else(|| settings.shell_bin.clone(), str::to_owned);
            let args = match mode {
                InvocationMode::DryRun => vec![path, String::from("--dry-run")],
                InvocationMode::Help => vec![path, String::from("--help")],
                InvocationMode::SourceOnly => vec![String::from("-n"), path],
            };
            (program, args)
        }
        ScriptKind::PowerShell => {
            let mut args: Vec<String> = PWSH_FLAGS.iter().map(|flag| (*flag).to_owned()).collect();
            match mode {
                InvocationMode::DryRun => {
                    args.extend([String::from("-File"), path, String::from("-WhatIf")]);
                }
                InvocationMode::Help => {
                    args.extend([
                        String::from("-Command"),
                        format!("Get-Help -Full -Name {} | Out-String", ps_literal(&path)),
                    ]);
                }
                InvocationMode::SourceOnly => {
                    args.extend([
                        String::from("-Command"),
                        format!(
                            "$errors = $null; $null = [System.Management.Automation.Language.Parser]::ParseFile({}, [ref]$null, [ref]$errors); if ($errors) {{ $errors | ForEach-Object {{ [Console]::Error.WriteLine($_.ToString()) }}; exit 1 }}",
                            ps_literal(&path)
                        ),
                    ]);
                }
            }
            (settings.pwsh_bin.clone(), args)
        }
    };
    Invocation {
        program,
        args,
        mode,
        timeout: settings.timeout,
    }
}
