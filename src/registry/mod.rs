//! Project persistence.
//!
//! Registries store the latest committed [`ProjectRecord`] per name. Writes
//! are optimistic: a record is only accepted if its revision is exactly one
//! past the stored revision.

mod json_file;
mod memory;

pub use json_file::JsonFileRegistry;
pub use memory::InMemoryRegistry;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::project::{ProjectRecord, ProjectSummary};

/// Storage seam for project records.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Stores a new record. Fails with `AlreadyExists` if the name is taken,
    /// including when two creations race.
    async fn create(&self, record: &ProjectRecord) -> Result<()>;

    /// Loads the latest committed record.
    async fn get(&self, name: &str) -> Result<ProjectRecord>;

    /// Replaces the stored record. Fails with `StaleRecord` unless the
    /// record's revision directly follows the stored one.
    async fn put(&self, record: &ProjectRecord) -> Result<()>;

    /// Summaries of every project, ordered by name.
    async fn list(&self) -> Result<Vec<ProjectSummary>>;
}

/// Stamps `record` with the next revision and writes it.
pub(crate) async fn commit(registry: &dyn ProjectRegistry, record: &mut ProjectRecord) -> Result<()> {
    record.mark_committed();
    registry.put(record).await
}

/// Checks the optimistic-concurrency rule for `put`.
pub(crate) fn check_revision(stored: &ProjectRecord, incoming: &ProjectRecord) -> Result<()> {
    if incoming.revision() != stored.revision() + 1 {
        return Err(Error::StaleRecord {
            name: incoming.name().to_string(),
            stored: stored.revision(),
            attempted: incoming.revision(),
        });
    }
    Ok(())
}
