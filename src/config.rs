//! Configuration loading via `ortho-config`.
//!
//! [`HarnessConfig`] merges defaults, `provcheck.toml`, and `PROVCHECK_*`
//! environment variables. The binary then layers its own flags on top through
//! [`ConfigOverrides`] and turns the result into validated
//! [`HarnessSettings`].

use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::classify::CloudPatterns;
use crate::harness::HarnessSettings;
use crate::probe::ProberSettings;
use crate::report::RunMode;

/// Configuration file name searched for by the loader.
pub const CONFIG_FILE_NAME: &str = "provcheck.toml";

/// Harness settings derived from configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PROVCHECK",
    discovery(
        app_name = "provcheck",
        env_var = "PROVCHECK_CONFIG_PATH",
        config_file_name = "provcheck.toml",
        dotfile_name = ".provcheck.toml",
        project_file_name = "provcheck.toml"
    )
)]
pub struct HarnessConfig {
    /// Directory searched for scripts.
    #[ortho_config(default = ".".to_owned())]
    pub root: String,
    /// Comma-separated exclusion globs, matched against relative paths.
    pub exclude: Option<String>,
    /// Comma-separated script extensions to discover.
    #[ortho_config(default = "sh,bash,ps1".to_owned())]
    pub extensions: String,
    /// Validate syntax only; never run a script.
    #[ortho_config(default = false)]
    pub skip_execution: bool,
    /// Include error positions and captured output in the console trace.
    #[ortho_config(default = false)]
    pub verbose: bool,
    /// Per-script invocation timeout in seconds.
    #[ortho_config(default = 60)]
    pub timeout_secs: u64,
    /// Maximum scripts checked at once; `0` uses the available parallelism.
    #[ortho_config(default = 0)]
    pub concurrency: usize,
    /// Directory receiving the run log and JSON reports.
    #[ortho_config(default = "test-results".to_owned())]
    pub output_dir: String,
    /// Shell used for scripts without a recognised shebang.
    #[ortho_config(default = "sh".to_owned())]
    pub shell_bin: String,
    /// PowerShell executable.
    #[ortho_config(default = "pwsh".to_owned())]
    pub pwsh_bin: String,
    /// Extra comma-separated regular expressions marking cloud-only scripts.
    pub cloud_patterns: Option<String>,
}

/// Values supplied on the command line, applied over loaded configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    /// Root path argument.
    pub root: Option<String>,
    /// Additional exclusion globs.
    pub exclude: Vec<String>,
    /// Force syntax-only mode.
    pub skip_execution: bool,
    /// Force verbose output.
    pub verbose: bool,
    /// Timeout override in seconds.
    pub timeout_secs: Option<u64>,
    /// Concurrency override.
    pub concurrency: Option<usize>,
    /// Output directory override.
    pub output_dir: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl HarnessConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("provcheck")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies command-line values over the loaded configuration.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(root) = overrides.root {
            self.root = root;
        }
        if !overrides.exclude.is_empty() {
            let mut patterns = split_list(self.exclude.as_deref());
            patterns.extend(overrides.exclude);
            self.exclude = Some(patterns.join(","));
        }
        self.skip_execution |= overrides.skip_execution;
        self.verbose |= overrides.verbose;
        if let Some(timeout) = overrides.timeout_secs {
            self.timeout_secs = timeout;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.output_dir = output_dir;
        }
        self
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank
    /// and [`ConfigError::InvalidValue`] for a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.root,
            &FieldMetadata::new("root search path", "PROVCHECK_ROOT", "root"),
        )?;
        Self::require_field(
            &self.extensions,
            &FieldMetadata::new("script extensions", "PROVCHECK_EXTENSIONS", "extensions"),
        )?;
        Self::require_field(
            &self.output_dir,
            &FieldMetadata::new("output directory", "PROVCHECK_OUTPUT_DIR", "output_dir"),
        )?;
        Self::require_field(
            &self.shell_bin,
            &FieldMetadata::new("shell interpreter", "PROVCHECK_SHELL_BIN", "shell_bin"),
        )?;
        Self::require_field(
            &self.pwsh_bin,
            &FieldMetadata::new("PowerShell interpreter", "PROVCHECK_PWSH_BIN", "pwsh_bin"),
        )?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "timeout must be at least one second: set PROVCHECK_TIMEOUT_SECS, pass --timeout, or add timeout_secs to {CONFIG_FILE_NAME}"
            )));
        }
        Ok(())
    }

    /// Validates the configuration and resolves it into harness settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or an extra cloud pattern
    /// is not a valid regular expression.
    pub fn into_settings(self) -> Result<HarnessSettings, ConfigError> {
        self.validate()?;
        let cloud_patterns = CloudPatterns::with_extra(split_list(self.cloud_patterns.as_deref()))
            .map_err(|err| {
                ConfigError::InvalidValue(format!(
                    "{err}: fix PROVCHECK_CLOUD_PATTERNS or cloud_patterns in {CONFIG_FILE_NAME}"
                ))
            })?;
        let concurrency = NonZeroUsize::new(self.concurrency).unwrap_or_else(default_concurrency);
        let mode = if self.skip_execution {
            RunMode::SyntaxOnly
        } else {
            RunMode::Full
        };

        Ok(HarnessSettings {
            root: Utf8PathBuf::from(self.root.trim()),
            exclude: split_list(self.exclude.as_deref()),
            extensions: split_list(Some(&self.extensions)),
            mode,
            verbose: self.verbose,
            concurrency,
            output_dir: Utf8PathBuf::from(self.output_dir.trim()),
            prober: ProberSettings {
                shell_bin: self.shell_bin.trim().to_owned(),
                pwsh_bin: self.pwsh_bin.trim().to_owned(),
                timeout: Duration::from_secs(self.timeout_secs),
            },
            cloud_patterns,
        })
    }
}

/// Worker-pool bound used when none is configured.
#[must_use]
pub fn default_concurrency() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
