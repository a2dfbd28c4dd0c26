//! Error types for the contract drafting workflow.

use std::time::Duration;

use thiserror::Error;

use crate::classifier::UserAction;
use crate::phase::Phase;

/// Top-level error type for orchestration operations.
///
/// Compiler diagnostics never show up here: they are classified and turned
/// into an error-handling stall on the project instead.
#[derive(Error, Debug)]
pub enum Error {
    /// No project with this name exists.
    #[error("project '{0}' not found")]
    NotFound(String),

    /// A project with this name already exists.
    #[error("project '{0}' already exists")]
    AlreadyExists(String),

    /// The project name cannot be used as an identifier.
    #[error("invalid project name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The operation is not allowed in the project's current phase.
    #[error("{operation} is not allowed in phase {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    /// The action is not offered for the active error.
    #[error("action '{action}' is not available: {reason}")]
    InvalidAction { action: UserAction, reason: String },

    /// The action name was not recognized.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// A required input or artifact is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Retry requested with no attempts left and nothing to repair.
    #[error("retry budget of {max} attempts exhausted")]
    RetryBudgetExhausted { max: u32 },

    /// An external call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    ExternalTimeout {
        operation: &'static str,
        after: Duration,
    },

    /// A transition outside the workflow's edge table was attempted.
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    /// The stored record moved on since it was read.
    #[error("stale record for '{name}': stored revision {stored}, attempted {attempted}")]
    StaleRecord {
        name: String,
        stored: u64,
        attempted: u64,
    },

    /// The generation service failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The verification compiler could not be run.
    #[error("verification compiler failed: {0}")]
    Compiler(String),

    /// The renderer failed.
    #[error("rendering failed: {0}")]
    Render(String),

    /// The project store holds a record that cannot be read back.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
