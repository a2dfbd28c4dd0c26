//! In-memory project registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::project::{ProjectRecord, ProjectSummary};

use super::{check_revision, ProjectRegistry};

/// Keeps records in a shared map. Useful for tests and short-lived runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    records: Arc<RwLock<HashMap<String, ProjectRecord>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored projects.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProjectRegistry for InMemoryRegistry {
    async fn create(&self, record: &ProjectRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(record.name()) {
            return Err(Error::AlreadyExists(record.name().to_string()));
        }
        records.insert(record.name().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<ProjectRecord> {
        let records = self.records.read().await;
        records
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn put(&self, record: &ProjectRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let stored = records
            .get(record.name())
            .ok_or_else(|| Error::NotFound(record.name().to_string()))?;
        check_revision(stored, record)?;
        records.insert(record.name().to_string(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProjectSummary>> {
        let records = self.records.read().await;
        let mut summaries: Vec<ProjectSummary> = records.values().map(|r| r.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}
