//! Safety classification of syntactically valid scripts.
//!
//! [`classify`] is a pure function of the script text, its syntax result, and
//! the privilege probe. Checks run in the explicit order of
//! [`Classification::PRIORITY`]; the first check that fires wins and carries
//! the evidence that triggered it.

mod rules;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::privilege::PrivilegeProbe;
use crate::script::{ScriptKind, ScriptUnit};
use crate::syntax::SyntaxResult;

/// Individual safety checks, in the order they are evaluated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SafetyCheck {
    /// The syntax stage failed.
    SyntaxFailed,
    /// The script declares required inputs without defaults.
    MandatoryParams,
    /// The script needs elevation the current process lacks.
    PrivilegeRequired,
    /// The script talks to cloud metadata services or agents.
    CloudDependent,
}

/// Verdict for one script.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Classification {
    /// Safe to probe.
    Executable,
    /// Required inputs the harness cannot synthesise.
    SkipMandatoryParams {
        /// Names of the offending parameters.
        parameters: Vec<String>,
    },
    /// Elevation required but not held.
    SkipPrivilegeRequired {
        /// Matched guard or prerequisite text.
        evidence: String,
    },
    /// Depends on a cloud provider's instance environment.
    SkipCloudDependent {
        /// Matched address or agent name.
        evidence: String,
    },
    /// Syntax validation failed, so nothing else is attempted.
    SkipSyntaxFailed,
}

impl Classification {
    /// Evaluation order; earlier checks take precedence.
    pub const PRIORITY: [SafetyCheck; 4] = [
        SafetyCheck::SyntaxFailed,
        SafetyCheck::MandatoryParams,
        SafetyCheck::PrivilegeRequired,
        SafetyCheck::CloudDependent,
    ];

    /// Returns `true` for [`Classification::Executable`].
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        matches!(self, Self::Executable)
    }

    /// Short machine-friendly label, e.g. `skip:cloud-dependent`.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::SkipMandatoryParams { .. } => "skip:mandatory-params",
            Self::SkipPrivilegeRequired { .. } => "skip:privilege-required",
            Self::SkipCloudDependent { .. } => "skip:cloud-dependent",
            Self::SkipSyntaxFailed => "skip:syntax-failed",
        }
    }

    /// Human-readable reason for a skip, or `None` when executable.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Executable => None,
            Self::SkipMandatoryParams { parameters } => Some(format!(
                "mandatory parameters without defaults: {}",
                parameters.join(", ")
            )),
            Self::SkipPrivilegeRequired { evidence } => {
                Some(format!("requires elevated privileges ({evidence})"))
            }
            Self::SkipCloudDependent { evidence } => Some(format!(
                "depends on cloud instance metadata or agents ({evidence})"
            )),
            Self::SkipSyntaxFailed => Some(String::from("syntax validation failed")),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(formatter, "{}: {reason}", self.label()),
            None => formatter.write_str(self.label()),
        }
    }
}

/// A cloud pattern that failed to compile.
#[derive(Debug, Error)]
#[error("invalid cloud pattern `{pattern}`: {source}")]
pub struct CloudPatternError {
    /// The rejected pattern.
    pub pattern: String,
    /// Compilation failure reported by `regex`.
    #[source]
    pub source: regex::Error,
}

const BUILTIN_CLOUD_PATTERNS: [&str; 8] = [
    r"169\.254\.169\.254",
    r"(?i)fd00:ec2::254",
    r"169\.254\.170\.2\b",
    r"100\.100\.100\.200",
    r"(?i)metadata\.google\.internal",
    r"(?i)metadata\.azure\.com",
    r"(?i)\b(?:waagent|WALinuxAgent|amazon-ssm-agent|AmazonSSMAgent|EC2Launch(?:V2)?|EC2Config|google-guest-agent|GCEWindowsAgent|google_osconfig_agent|oracle-cloud-agent)\b",
    r"(?i)\b(?:Get-EC2InstanceMetadata|Get-AzVM)\b",
];

static BUILTIN_CLOUD: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BUILTIN_CLOUD_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Cloud-dependence signals: the built-in list plus configured extras.
#[derive(Clone, Debug, Default)]
pub struct CloudPatterns {
    extra: Vec<Regex>,
}

impl CloudPatterns {
    /// Only the built-in addresses and agent names.
    #[must_use]
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-ins plus additional regular expressions.
    ///
    /// # Errors
    ///
    /// Returns [`CloudPatternError`] for the first pattern that does not
    /// compile.
    pub fn with_extra<I, S>(patterns: I) -> Result<Self, CloudPatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|source| CloudPatternError {
                    pattern: pattern.as_ref().to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { extra })
    }

    /// Returns the earliest match in `source`, if any.
    #[must_use]
    pub fn find(&self, source: &str) -> Option<String> {
        BUILTIN_CLOUD
            .iter()
            .chain(&self.extra)
            .filter_map(|regex| regex.find(source))
            .min_by_key(regex::Match::start)
            .map(|found| found.as_str().to_owned())
    }
}

/// Classifies one script.
///
/// The privilege probe is only consulted when the script carries a
/// privilege signal.
#[must_use]
pub fn classify(
    script: &ScriptUnit,
    source: &str,
    syntax: &SyntaxResult,
    privilege: &dyn PrivilegeProbe,
    cloud: &CloudPatterns,
) -> Classification {
    Classification::PRIORITY
        .iter()
        .find_map(|check| run_check(*check, script.kind(), source, syntax, privilege, cloud))
        .unwrap_or(Classification::Executable)
}

fn run_check(
    check: SafetyCheck,
    kind: ScriptKind,
    source: &str,
    syntax: &SyntaxResult,
    privilege: &dyn PrivilegeProbe,
    cloud: &CloudPatterns,
) -> Option<Classification> {
    match check {
        SafetyCheck::SyntaxFailed => (!syntax.passed()).then_some(Classification::SkipSyntaxFailed),
        SafetyCheck::MandatoryParams => {
            let parameters = rules::mandatory_parameters(kind, source);
            (!parameters.is_empty()).then_some(Classification::SkipMandatoryParams { parameters })
        }
        SafetyCheck::PrivilegeRequired => rules::privilege_signal(kind, source)
            .filter(|_| !privilege.is_privileged())
            .map(|evidence| Classification::SkipPrivilegeRequired { evidence }),
        SafetyCheck::CloudDependent => cloud
            .find(source)
            .map(|evidence| Classification::SkipCloudDependent { evidence }),
    }
}

#[cfg(test)]
mod tests;
