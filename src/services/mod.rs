//! External collaborators of the workflow.
//!
//! The orchestrator only talks to the verification compiler, the generation
//! service, and the draft renderer through these traits. Process-backed
//! adapters for Idris2 and the Claude CLI are provided alongside a plain
//! source-listing renderer.

mod claude;
mod idris;
mod listing;

pub use claude::ClaudeGenerator;
pub use idris::Idris2Compiler;
pub use listing::ListingRenderer;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::project::ProjectRecord;

/// Source handed to the compiler or renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Project the source belongs to.
    pub project: String,
    /// PascalCase module name.
    pub module_name: String,
    /// Version the source was generated for.
    pub version: u32,
    pub source: String,
}

impl SourceUnit {
    /// Builds a unit from a record's current source.
    pub fn from_record(record: &ProjectRecord, source: impl Into<String>) -> Self {
        Self {
            project: record.name().to_string(),
            module_name: record.module_name(),
            version: record.version(),
            source: source.into(),
        }
    }
}

/// Outcome of one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Passed,
    /// The compiler rejected the source; carries the raw diagnostic.
    Failed(String),
}

/// Everything the generation service needs to produce domain source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub project: String,
    pub module_name: String,
    pub version: u32,
    pub document_type: String,
    pub prompt: String,
    pub reference_docs: Vec<String>,
    /// Feedback on earlier versions, oldest first.
    pub feedback: Vec<String>,
}

impl GenerationRequest {
    /// Builds a request from a record's inputs and feedback log.
    pub fn from_record(record: &ProjectRecord) -> Self {
        Self {
            project: record.name().to_string(),
            module_name: record.module_name(),
            version: record.version(),
            document_type: record.inputs.document_type.clone(),
            prompt: record.inputs.prompt.clone(),
            reference_docs: record.inputs.reference_docs.clone(),
            feedback: record
                .feedback_log()
                .iter()
                .map(|entry| format!("v{}: {}", entry.version, entry.text))
                .collect(),
        }
    }
}

/// Renderer output. At least one of `text` and `markdown` must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDraft {
    pub text: Option<String>,
    pub markdown: Option<String>,
    pub csv: Option<String>,
}

impl RenderedDraft {
    /// Returns true if a readable body was produced.
    pub fn has_body(&self) -> bool {
        self.text.is_some() || self.markdown.is_some()
    }
}

/// Checks domain source with a dependently-typed compiler.
#[async_trait]
pub trait VerificationCompiler: Send + Sync {
    /// Compiles `unit`. A rejected source is `Ok(Verification::Failed)`;
    /// `Err` means the compiler itself could not be run.
    async fn verify(&self, unit: &SourceUnit) -> Result<Verification>;

    /// Returns the name of this compiler.
    fn name(&self) -> &str;
}

/// Produces and repairs domain source.
#[async_trait]
pub trait SourceGenerator: Send + Sync {
    /// Generates domain source from the project inputs.
    async fn generate_domain_source(&self, request: &GenerationRequest) -> Result<String>;

    /// Returns a corrected version of `unit` given the compiler diagnostic.
    async fn repair(&self, unit: &SourceUnit, diagnostic: &str) -> Result<String>;

    /// Returns the name of this generator.
    fn name(&self) -> &str;
}

/// Renders a verified model into a draft document.
#[async_trait]
pub trait DraftRenderer: Send + Sync {
    async fn render(&self, unit: &SourceUnit) -> Result<RenderedDraft>;

    /// Returns the name of this renderer.
    fn name(&self) -> &str;
}

/// The set of collaborators one orchestrator works with.
#[derive(Clone)]
pub struct Services {
    pub compiler: Arc<dyn VerificationCompiler>,
    pub generator: Arc<dyn SourceGenerator>,
    pub renderer: Arc<dyn DraftRenderer>,
}

impl Services {
    pub fn new(
        compiler: Arc<dyn VerificationCompiler>,
        generator: Arc<dyn SourceGenerator>,
        renderer: Arc<dyn DraftRenderer>,
    ) -> Self {
        Self {
            compiler,
            generator,
            renderer,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("compiler", &self.compiler.name())
            .field("generator", &self.generator.name())
            .field("renderer", &self.renderer.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectInputs;

    #[test]
    fn generation_request_carries_feedback_history() {
        let mut record = ProjectRecord::new(
            "lease_deal",
            ProjectInputs::new("lease").with_reference("plan.md"),
        )
        .unwrap();
        record.push_feedback("raise the deposit");

        let request = GenerationRequest::from_record(&record);
        assert_eq!(request.module_name, "LeaseDeal");
        assert_eq!(request.reference_docs, vec!["plan.md"]);
        assert_eq!(request.feedback, vec!["v1: raise the deposit"]);
    }

    #[test]
    fn rendered_draft_needs_text_or_markdown() {
        assert!(!RenderedDraft::default().has_body());
        let csv_only = RenderedDraft {
            csv: Some("a,b".to_string()),
            ..Default::default()
        };
        assert!(!csv_only.has_body());
        let markdown = RenderedDraft {
            markdown: Some("# Draft".to_string()),
            ..Default::default()
        };
        assert!(markdown.has_body());
    }
}
