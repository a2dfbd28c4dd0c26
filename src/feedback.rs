//! Feedback-driven refinement.

use crate::error::{Error, Result};
use crate::machine::PhaseStateMachine;
use crate::phase::Phase;
use crate::project::ProjectRecord;

/// Turns reviewer feedback into a new version of the project.
pub struct FeedbackRefinementController<'a> {
    machine: &'a PhaseStateMachine,
}

impl<'a> FeedbackRefinementController<'a> {
    pub fn new(machine: &'a PhaseStateMachine) -> Self {
        Self { machine }
    }

    /// Records feedback on the current draft and sends the project back to
    /// analysis as the next version.
    ///
    /// This is the only path that increments the version.
    pub fn submit_feedback(&self, record: &mut ProjectRecord, text: &str) -> Result<()> {
        let phase = record.phase();
        if !matches!(phase, Phase::Draft | Phase::Feedback) || record.active_error().is_some() {
            return Err(Error::InvalidPhase {
                operation: "submit_feedback",
                phase,
            });
        }
        if text.trim().is_empty() {
            return Err(Error::Precondition("feedback text is empty".to_string()));
        }

        record.push_feedback(text.trim());
        record.enter(Phase::Refinement)?;
        record.enter(Phase::Analysis)?;
        record.bump_version();
        record.attempt_count = 0;
        record.draft = None;
        record.domain_source = None;
        record.clear_error_history();

        tracing::info!(
            project = %record.name(),
            version = record.version(),
            "feedback accepted, regenerating"
        );
        Ok(())
    }

    /// Finalizes the current draft.
    pub fn finalize_current(&self, record: &mut ProjectRecord) -> Result<()> {
        self.machine.finalize(record)
    }
}
