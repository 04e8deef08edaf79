//! Core library for the provcheck provisioning-script harness.
//!
//! The crate discovers shell and PowerShell scripts, validates their syntax
//! without executing them, classifies whether each one is safe to exercise
//! on the current host, probes the safe ones through their least invasive
//! entry point, and aggregates everything into a console trace, a run log,
//! and a JSON report.

pub mod classify;
pub mod config;
pub mod discover;
pub mod harness;
pub mod privilege;
pub mod probe;
pub mod report;
pub mod script;
pub mod syntax;
pub mod test_support;

pub use classify::{Classification, CloudPatterns, classify};
pub use config::{ConfigError, ConfigOverrides, HarnessConfig};
pub use discover::{DiscoveryError, DiscoveryOptions, discover};
pub use harness::{Harness, HarnessError, HarnessSettings, RunOutcome};
pub use privilege::{FixedPrivilege, PrivilegeProbe, host_probe};
pub use probe::{
    ExecutionOutcome, ExecutionProber, ExecutionResult, InvocationMode, ProbeRunner,
    ProcessProbeRunner,
};
pub use report::{Aggregator, RunMode, RunReport, ScriptRecord};
pub use script::{ScriptKind, ScriptUnit};
pub use syntax::{ParseError, SyntaxResult, validate};
