//! Drafter configuration and validation.
//!
//! Configuration is read from TOML. Every field has a default so a partial
//! file (or no file) is enough to run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hard ceiling on attempts per compilation cycle.
pub const MAX_ATTEMPTS_CEILING: u32 = 5;

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Retry budget for the verify loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per compilation cycle. Can only be lowered from 5.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Stall early when the same diagnostic comes back this many times in a
    /// row. Disabled when unset.
    #[serde(default)]
    pub repeated_diagnostic_limit: Option<u32>,
}

fn default_max_attempts() -> u32 {
    MAX_ATTEMPTS_CEILING
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            repeated_diagnostic_limit: None,
        }
    }
}

/// Deadlines for external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// One verification compiler run.
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
    /// One generation or repair call.
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
    /// One draft rendering.
    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

fn default_verify_timeout() -> u64 {
    30
}

fn default_generation_timeout() -> u64 {
    600
}

fn default_render_timeout() -> u64 {
    120
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            verify_timeout_secs: default_verify_timeout(),
            generation_timeout_secs: default_generation_timeout(),
            render_timeout_secs: default_render_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

/// How the verification compiler is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default = "default_compiler_command")]
    pub command: String,
    /// Arguments placed before the source file.
    #[serde(default = "default_compiler_args")]
    pub args: Vec<String>,
    /// Directory source units are written to before checking.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_compiler_command() -> String {
    "idris2".to_string()
}

fn default_compiler_args() -> Vec<String> {
    vec!["--check".to_string()]
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("build/domains")
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            command: default_compiler_command(),
            args: default_compiler_args(),
            work_dir: default_work_dir(),
        }
    }
}

/// How the generation service is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_command")]
    pub command: String,
    /// Model passed to the CLI, if any.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_generator_command() -> String {
    "claude".to_string()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: default_generator_command(),
            model: None,
        }
    }
}

/// Where project records live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrafterConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Activity entries kept per project.
    #[serde(default = "default_activity_log_limit")]
    pub activity_log_limit: usize,
}

fn default_activity_log_limit() -> usize {
    crate::project::DEFAULT_ACTIVITY_LIMIT
}

impl Default for DrafterConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeouts: TimeoutsConfig::default(),
            compiler: CompilerConfig::default(),
            generator: GeneratorConfig::default(),
            storage: StorageConfig::default(),
            activity_log_limit: default_activity_log_limit(),
        }
    }
}

impl DrafterConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DrafterConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        for warning in config.validate().into_result()? {
            tracing::warn!(warning = %warning, "configuration warning");
        }
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_attempts == 0 {
            result.add_error("retry.max_attempts must be at least 1");
        }
        if self.max_attempts > MAX_ATTEMPTS_CEILING {
            result.add_error(format!(
                "retry.max_attempts cannot exceed {}",
                MAX_ATTEMPTS_CEILING
            ));
        }

        if let Some(limit) = self.repeated_diagnostic_limit {
            if limit < 2 {
                result.add_error("retry.repeated_diagnostic_limit must be at least 2");
            } else if limit > self.max_attempts {
                result.add_warning(
                    "retry.repeated_diagnostic_limit exceeds max_attempts and will never trigger",
                );
            }
        }

        result
    }
}

impl Validate for TimeoutsConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (name, secs) in [
            ("verify_timeout_secs", self.verify_timeout_secs),
            ("generation_timeout_secs", self.generation_timeout_secs),
            ("render_timeout_secs", self.render_timeout_secs),
        ] {
            if secs == 0 {
                result.add_error(format!("timeouts.{} must be greater than 0", name));
            }
        }

        if self.verify_timeout_secs > 0 && self.verify_timeout_secs < 5 {
            result.add_warning("timeouts.verify_timeout_secs under 5s may cut off slow checks");
        }

        result
    }
}

impl Validate for DrafterConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.retry.validate());
        result.merge(self.timeouts.validate());

        if self.compiler.command.trim().is_empty() {
            result.add_error("compiler.command cannot be empty");
        }
        if self.generator.command.trim().is_empty() {
            result.add_error("generator.command cannot be empty");
        }
        if self.activity_log_limit == 0 {
            result.add_error("activity_log_limit must be at least 1");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafter_config_has_sensible_defaults() {
        let config = DrafterConfig::default();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.repeated_diagnostic_limit, None);
        assert_eq!(config.timeouts.verify_timeout(), Duration::from_secs(30));
        assert_eq!(config.compiler.command, "idris2");
        assert_eq!(config.compiler.args, vec!["--check"]);
        assert_eq!(config.generator.command, "claude");
        assert_eq!(config.storage.projects_dir, PathBuf::from("output"));
        assert_eq!(config.activity_log_limit, 100);
        assert!(config.validate().is_valid());
    }

    #[test]
    fn drafter_config_deserializes_from_toml() {
        let toml = r#"
            activity_log_limit = 20

            [retry]
            max_attempts = 3
            repeated_diagnostic_limit = 3

            [timeouts]
            verify_timeout_secs = 10

            [generator]
            model = "opus"
        "#;

        let config = DrafterConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.repeated_diagnostic_limit, Some(3));
        assert_eq!(config.timeouts.verify_timeout_secs, 10);
        assert_eq!(config.timeouts.generation_timeout_secs, 600);
        assert_eq!(config.generator.model.as_deref(), Some("opus"));
        assert_eq!(config.activity_log_limit, 20);
    }

    #[test]
    fn max_attempts_cannot_be_raised() {
        let err = DrafterConfig::from_toml_str("[retry]\nmax_attempts = 8\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let config = RetryConfig {
            max_attempts: 0,
            repeated_diagnostic_limit: None,
        };
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn unreachable_repeat_limit_warns() {
        let config = RetryConfig {
            max_attempts: 3,
            repeated_diagnostic_limit: Some(4),
        };
        let result = config.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = TimeoutsConfig {
            render_timeout_secs: 0,
            ..Default::default()
        };
        let result = config.validate();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("render_timeout_secs"));
    }

    #[test]
    fn validation_result_into_result_joins_errors() {
        let mut result = ValidationResult::default();
        result.add_error("first");
        result.add_error("second");
        let err = result.into_result().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: first; second");
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = DrafterConfig::from_toml_str("retry = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
