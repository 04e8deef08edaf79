use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::*;
use crate::privilege::FixedPrivilege;
use crate::syntax::{ParseError, SyntaxResult};

fn unit(kind: ScriptKind) -> ScriptUnit {
    let name = match kind {
        ScriptKind::Shell => "script.sh",
        ScriptKind::PowerShell => "script.ps1",
    };
    ScriptUnit::new(Utf8PathBuf::from(format!("/tmp/{name}")), name, kind)
}

#[fixture]
fn cloud() -> CloudPatterns {
    CloudPatterns::builtin()
}

fn run(kind: ScriptKind, source: &str, privileged: bool, cloud: &CloudPatterns) -> Classification {
    classify(
        &unit(kind),
        source,
        &SyntaxResult::pass(),
        &FixedPrivilege(privileged),
        cloud,
    )
}

#[test]
fn builtin_cloud_patterns_all_compile() {
    assert_eq!(BUILTIN_CLOUD.len(), BUILTIN_CLOUD_PATTERNS.len());
}

#[rstest]
fn plain_scripts_are_executable(cloud: CloudPatterns) {
    let verdict = run(ScriptKind::Shell, "#!/bin/sh\necho hello\n", false, &cloud);
    assert_eq!(verdict, Classification::Executable);
    assert!(verdict.is_executable());
    assert_eq!(verdict.reason(), None);
}

#[rstest]
fn failed_syntax_wins_over_everything(cloud: CloudPatterns) {
    let failed = SyntaxResult::from_errors(vec![ParseError::new("broken")]);
    let verdict = classify(
        &unit(ScriptKind::Shell),
        "curl http://169.254.169.254/\n: \"${TOKEN:?}\"\n",
        &failed,
        &FixedPrivilege(false),
        &cloud,
    );
    assert_eq!(verdict, Classification::SkipSyntaxFailed);
}

#[rstest]
#[case::required_expansion(": \"${API_TOKEN:?API_TOKEN must be set}\"\n", vec!["API_TOKEN"])]
#[case::positional(": \"${1?usage: install.sh <version>}\"\n", vec!["$1"])]
#[case::deduplicated("echo ${HOST:?} ${HOST:?} ${PORT?}\n", vec!["HOST", "PORT"])]
#[case::count_guard("if [ \"$#\" -lt 2 ]; then\n  echo usage >&2; exit 1\nfi\n", vec!["2 positional arguments"])]
#[case::empty_guard("[ $# -eq 0 ] && { echo usage; exit 64; }\n", vec!["1 positional argument"])]
fn shell_required_inputs_skip(
    cloud: CloudPatterns,
    #[case] source: &str,
    #[case] expected: Vec<&str>,
) {
    let verdict = run(ScriptKind::Shell, source, true, &cloud);
    let parameters = expected.into_iter().map(String::from).collect();
    assert_eq!(verdict, Classification::SkipMandatoryParams { parameters });
}

#[rstest]
#[case::defaulted_expansion("echo ${NAME:-world}\n")]
#[case::branch_on_count("if [ $# -eq 1 ]; then echo one; fi\n")]
fn shell_optional_inputs_stay_executable(cloud: CloudPatterns, #[case] source: &str) {
    assert_eq!(run(ScriptKind::Shell, source, false, &cloud), Classification::Executable);
}

#[rstest]
fn powershell_mandatory_parameters_without_defaults(cloud: CloudPatterns) {
    let source = "[CmdletBinding()]\nparam(\n  # the target host\n  [Parameter(Mandatory)]\n  [string]$ComputerName,\n  [Parameter(Mandatory = $true, HelpMessage = 'a, b')][int]$Port,\n  [Parameter(Mandatory)][string]$Mode = 'fast',\n  [Parameter(Mandatory = $false)][string]$Optional,\n  [switch]$Force\n)\nWrite-Host $ComputerName\n";
    let verdict = run(ScriptKind::PowerShell, source, true, &cloud);
    assert_eq!(
        verdict,
        Classification::SkipMandatoryParams {
            parameters: vec![String::from("ComputerName"), String::from("Port")],
        }
    );
    assert_eq!(
        verdict.reason().as_deref(),
        Some("mandatory parameters without defaults: ComputerName, Port")
    );
}

#[rstest]
fn function_param_blocks_are_ignored(cloud: CloudPatterns) {
    let source = "function Set-Thing {\n  param([Parameter(Mandatory)][string]$Name)\n  $Name\n}\nSet-Thing -Name x\n";
    assert_eq!(run(ScriptKind::PowerShell, source, false, &cloud), Classification::Executable);
}

#[rstest]
#[case::euid_guard(ScriptKind::Shell, "if [ \"$EUID\" -ne 0 ]; then exit 1; fi\n", "EUID\" -ne 0")]
#[case::id_guard(ScriptKind::Shell, "[ \"$(id -u)\" != \"0\" ] && exit 1\n", "$(id -u)\" != \"0")]
#[case::root_prerequisite(ScriptKind::Shell, "# This script must be run as root.\napt-get update\n", "must be run as root")]
#[case::requires_admin(ScriptKind::PowerShell, "#Requires -RunAsAdministrator\nSet-Service x\n", "#Requires -RunAsAdministrator")]
#[case::role_check(
    ScriptKind::PowerShell,
    "$p = New-Object Security.Principal.WindowsPrincipal $id\nif (-not $p.IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)) { exit 1 }\n",
    "WindowsBuiltInRole]::Administrator"
)]
fn privilege_signals_skip_when_unprivileged(
    cloud: CloudPatterns,
    #[case] kind: ScriptKind,
    #[case] source: &str,
    #[case] evidence: &str,
) {
    assert_eq!(
        run(kind, source, false, &cloud),
        Classification::SkipPrivilegeRequired {
            evidence: String::from(evidence),
        }
    );
    assert_eq!(run(kind, source, true, &cloud), Classification::Executable);
}

#[rstest]
#[case::imds("curl -s http://169.254.169.254/latest/meta-data/\n", "169.254.169.254")]
#[case::gce("curl -H Metadata-Flavor:Google http://metadata.google.internal/\n", "metadata.google.internal")]
#[case::agent("systemctl enable --now amazon-ssm-agent\n", "amazon-ssm-agent")]
#[case::azure_agent("systemctl restart waagent\n", "waagent")]
fn cloud_references_skip(cloud: CloudPatterns, #[case] source: &str, #[case] evidence: &str) {
    assert_eq!(
        run(ScriptKind::Shell, source, true, &cloud),
        Classification::SkipCloudDependent {
            evidence: String::from(evidence),
        }
    );
}

#[rstest]
fn mandatory_params_precede_privilege_and_cloud(cloud: CloudPatterns) {
    let source = "# must be run as root\n: ${REGION:?}\ncurl http://169.254.169.254/\n";
    let verdict = run(ScriptKind::Shell, source, false, &cloud);
    assert_eq!(verdict.label(), "skip:mandatory-params");
}

#[rstest]
fn privilege_precedes_cloud(cloud: CloudPatterns) {
    let source = "# must be run as root\nsystemctl restart waagent\n";
    let verdict = run(ScriptKind::Shell, source, false, &cloud);
    assert_eq!(verdict.label(), "skip:privilege-required");
}

#[test]
fn extra_cloud_patterns_extend_builtins() {
    let patterns = CloudPatterns::with_extra(["(?i)hetzner-metadata"]).expect("pattern compiles");
    assert_eq!(
        run(ScriptKind::Shell, "curl http://Hetzner-Metadata/v1\n", true, &patterns),
        Classification::SkipCloudDependent {
            evidence: String::from("Hetzner-Metadata"),
        }
    );
}

#[test]
fn invalid_extra_pattern_is_rejected() {
    let err = CloudPatterns::with_extra(["(unclosed"]).expect_err("pattern should fail");
    assert_eq!(err.pattern, "(unclosed");
}

#[test]
fn classification_serialises_with_kind_tag() {
    let json = serde_json::to_value(Classification::SkipCloudDependent {
        evidence: String::from("waagent"),
    })
    .expect("serialise");
    assert_eq!(
        json,
        serde_json::json!({ "kind": "skipCloudDependent", "evidence": "waagent" })
    );
}

#[test]
fn priority_order_is_explicit() {
    assert_eq!(
        Classification::PRIORITY,
        [
            SafetyCheck::SyntaxFailed,
            SafetyCheck::MandatoryParams,
            SafetyCheck::PrivilegeRequired,
            SafetyCheck::CloudDependent,
        ]
    );
}
