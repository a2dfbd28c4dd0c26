//! Claude Code CLI generation service.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::prompt;

use super::{GenerationRequest, SourceGenerator, SourceUnit};

/// Generates and repairs domain source by running the `claude` CLI.
pub struct ClaudeGenerator {
    /// Path to the claude CLI binary.
    cli_path: String,
    model: Option<String>,
}

impl Default for ClaudeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeGenerator {
    /// Creates a generator using the default `claude` command.
    pub fn new() -> Self {
        Self {
            cli_path: "claude".to_string(),
            model: None,
        }
    }

    /// Creates a generator with a custom CLI path.
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            model: None,
        }
    }

    /// Sets the model passed with `--model`.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Builds the command arguments for a one-shot prompt.
    fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "text".to_string(),
        ];

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    /// Runs the CLI and returns the Idris source found in its output.
    async fn run(&self, prompt: &str) -> Result<String> {
        tracing::info!(cli = %self.cli_path, model = ?self.model, "spawning Claude CLI");

        let output = Command::new(&self.cli_path)
            .args(self.build_args(prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Generation(format!("failed to spawn claude: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Generation(format!(
                "claude exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(bytes = stdout.len(), "claude output received");
        prompt::extract_source(&stdout)
            .ok_or_else(|| Error::Generation("no Idris source in model output".to_string()))
    }
}

#[async_trait]
impl SourceGenerator for ClaudeGenerator {
    async fn generate_domain_source(&self, request: &GenerationRequest) -> Result<String> {
        self.run(&prompt::generation_prompt(request)).await
    }

    async fn repair(&self, unit: &SourceUnit, diagnostic: &str) -> Result<String> {
        self.run(&prompt::repair_prompt(unit, diagnostic)).await
    }

    fn name(&self) -> &str {
        "claude-code"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_generator_builds_basic_args() {
        let generator = ClaudeGenerator::new();
        let args = generator.build_args("test prompt");

        assert!(args.contains(&"--print".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("test prompt"));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn claude_generator_includes_model_in_args() {
        let generator = ClaudeGenerator::new().with_model(Some("opus".to_string()));
        let args = generator.build_args("test");

        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"opus".to_string()));
    }

    #[test]
    fn claude_generator_with_custom_path() {
        let generator = ClaudeGenerator::with_cli_path("/usr/local/bin/claude");
        assert_eq!(generator.cli_path, "/usr/local/bin/claude");
        assert_eq!(generator.name(), "claude-code");
    }

    #[tokio::test]
    async fn missing_cli_is_generation_error() {
        let generator = ClaudeGenerator::with_cli_path("/nonexistent/claude-cli");
        let err = generator.run("prompt").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }
}
