//! Idris2 verification compiler.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::CompilerConfig;
use crate::error::{Error, Result};

use super::{SourceUnit, Verification, VerificationCompiler};

/// Runs `idris2 --check` on a source unit written under a work directory.
///
/// Each project gets its own directory; the module is written to
/// `<work_dir>/<project>/Domains/<Module>.idr` and checked from the project
/// directory so the module path resolves.
#[derive(Debug, Clone)]
pub struct Idris2Compiler {
    command: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl Idris2Compiler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let defaults = CompilerConfig::default();
        Self {
            command: defaults.command,
            args: defaults.args,
            work_dir: work_dir.into(),
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            work_dir: config.work_dir.clone(),
        }
    }

    /// Relative path of the module file inside the project directory.
    fn module_path(unit: &SourceUnit) -> PathBuf {
        Path::new("Domains").join(format!("{}.idr", unit.module_name))
    }

    async fn write_unit(&self, unit: &SourceUnit) -> Result<PathBuf> {
        let project_dir = self.work_dir.join(&unit.project);
        let file = project_dir.join(Self::module_path(unit));
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, &unit.source).await?;
        Ok(project_dir)
    }
}

#[async_trait]
impl VerificationCompiler for Idris2Compiler {
    async fn verify(&self, unit: &SourceUnit) -> Result<Verification> {
        let project_dir = self.write_unit(unit).await?;
        let module_path = Self::module_path(unit);

        tracing::debug!(
            command = %self.command,
            project = %unit.project,
            module = %unit.module_name,
            "running verification compiler"
        );

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(&module_path)
            .current_dir(&project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Compiler(format!("failed to spawn {}: {}", self.command, e)))?;

        if output.status.success() {
            return Ok(Verification::Passed);
        }

        let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !diagnostic.is_empty() && !diagnostic.ends_with('\n') {
                diagnostic.push('\n');
            }
            diagnostic.push_str(&stderr);
        }
        if diagnostic.trim().is_empty() {
            diagnostic = format!("{} exited with {}", self.command, output.status);
        }
        Ok(Verification::Failed(diagnostic))
    }

    fn name(&self) -> &str {
        "idris2"
    }
}
