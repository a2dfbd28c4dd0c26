//! Contract Drafter - workflow orchestrator for verified contract drafting
//!
//! Drives each project from its inputs through model generation, a bounded
//! compile-verify-retry loop against a dependently-typed compiler, draft
//! rendering, and feedback-driven refinement. Compiler failures are
//! classified and turned into explicit decisions for the user.

pub mod classifier;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod feedback;
pub mod machine;
pub mod orchestrator;
pub mod phase;
pub mod project;
pub mod prompt;
pub mod recovery;
pub mod registry;
pub mod services;

pub use error::{Error, Result};

pub use classifier::{
    normalize_diagnostic, ClassificationRule, ClassifiedError, ErrorClassifier, ErrorLevel,
    Location, MarkerSet, UserAction,
};
pub use config::{DrafterConfig, Validate, ValidationResult};
pub use context::{CallOutcome, Deadlines, ExecutionContext};
pub use coordinator::{CompileOutcome, CompileRetryCoordinator, LoopMode, RetryPolicy};
pub use feedback::FeedbackRefinementController;
pub use machine::PhaseStateMachine;
pub use orchestrator::ProjectOrchestrator;
pub use phase::Phase;
pub use project::{
    module_name, Draft, FeedbackEntry, PhaseTransition, ProjectInputs, ProjectRecord,
    ProjectSummary, StallReason, StatusSnapshot,
};
pub use recovery::{decide, weaken_proof_obligation, Recovery, RecoveryContext};
pub use registry::{InMemoryRegistry, JsonFileRegistry, ProjectRegistry};
pub use services::{
    ClaudeGenerator, DraftRenderer, GenerationRequest, Idris2Compiler, ListingRenderer,
    RenderedDraft, Services, SourceGenerator, SourceUnit, Verification, VerificationCompiler,
};
