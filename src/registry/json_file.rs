//! Project registry backed by JSON files on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::project::{validate_name, ProjectRecord, ProjectSummary};

use super::{check_revision, ProjectRegistry};

/// File name of the state file inside each project directory.
pub const STATE_FILE: &str = "workflow_state.json";

/// Stores each project at `<root>/<name>/workflow_state.json`.
///
/// Creation claims the project directory with a non-recursive `create_dir`,
/// so two racing creations cannot both succeed. Writes go to a temporary
/// file first and are renamed into place.
#[derive(Debug)]
pub struct JsonFileRegistry {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn state_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.project_dir(name)?.join(STATE_FILE))
    }

    async fn read(&self, path: &Path, name: &str) -> Result<ProjectRecord> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!("corrupt state file {}: {}", path.display(), e))
        })
    }

    async fn write_atomic(&self, path: &Path, record: &ProjectRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        let temp = path.with_extension(format!("json.tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&temp, json).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Removes a freshly claimed project directory when its first write failed,
/// so the name can be created again.
async fn release_on_error(dir: &Path, written: Result<()>) -> Result<()> {
    if written.is_err() {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            tracing::warn!(dir = ?dir, error = %e, "failed to remove partial project directory");
        }
    }
    written
}

#[async_trait]
impl ProjectRegistry for JsonFileRegistry {
    async fn create(&self, record: &ProjectRecord) -> Result<()> {
        let dir = self.project_dir(record.name())?;
        tokio::fs::create_dir_all(&self.root).await?;

        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(record.name().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(project = %record.name(), dir = ?dir, "project directory created");
        let written = self.write_atomic(&dir.join(STATE_FILE), record).await;
        release_on_error(&dir, written).await
    }

    async fn get(&self, name: &str) -> Result<ProjectRecord> {
        let path = self.state_path(name)?;
        self.read(&path, name).await
    }

    async fn put(&self, record: &ProjectRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.state_path(record.name())?;
        let stored = self.read(&path, record.name()).await?;
        check_revision(&stored, record)?;
        self.write_atomic(&path, record).await
    }

    async fn list(&self) -> Result<Vec<ProjectSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(STATE_FILE);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.read(&path, &name).await {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => {
                    tracing::warn!(project = %name, error = %e, "skipping unreadable project state");
                }
            }
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_first_write_releases_the_name() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("lease");
        tokio::fs::create_dir(&dir).await.unwrap();

        let result = release_on_error(&dir, Err(Error::Storage("disk full".to_string()))).await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn successful_write_keeps_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("lease");
        tokio::fs::create_dir(&dir).await.unwrap();

        release_on_error(&dir, Ok(())).await.unwrap();
        assert!(dir.exists());
    }
}
