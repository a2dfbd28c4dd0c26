//! Workflow phases and the table of legal transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named stage of the per-project workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Collecting the prompt and reference documents.
    #[default]
    Input,
    /// Turning the inputs into domain-model source.
    Analysis,
    /// Generated source is in place and awaiting verification.
    SpecGeneration,
    /// Running the verify loop.
    Compilation,
    /// Stalled on a classified compiler failure, awaiting a user decision.
    ErrorHandling,
    /// Verified model ready for rendering.
    DocImpl,
    /// A draft has been rendered for the current version.
    Draft,
    /// The draft is under review.
    Feedback,
    /// Feedback accepted, regeneration pending.
    Refinement,
    /// Finalized.
    Final,
    /// Stopped by the user. Never advances again.
    Aborted,
}

impl Phase {
    /// Every phase, in forward order.
    pub const ALL: [Phase; 11] = [
        Phase::Input,
        Phase::Analysis,
        Phase::SpecGeneration,
        Phase::Compilation,
        Phase::ErrorHandling,
        Phase::DocImpl,
        Phase::Draft,
        Phase::Feedback,
        Phase::Refinement,
        Phase::Final,
        Phase::Aborted,
    ];

    /// Phases reachable in one step from `self`.
    pub fn successors(self) -> &'static [Phase] {
        match self {
            Phase::Input => &[Phase::Analysis],
            Phase::Analysis => &[Phase::SpecGeneration, Phase::Aborted],
            Phase::SpecGeneration => &[Phase::Compilation],
            Phase::Compilation => &[Phase::DocImpl, Phase::ErrorHandling, Phase::Aborted],
            Phase::ErrorHandling => &[Phase::Compilation, Phase::Analysis, Phase::Aborted],
            Phase::DocImpl => &[Phase::Draft],
            Phase::Draft => &[Phase::Feedback, Phase::Refinement, Phase::Final],
            Phase::Feedback => &[Phase::Refinement, Phase::Final],
            Phase::Refinement => &[Phase::Analysis],
            Phase::Final | Phase::Aborted => &[],
        }
    }

    /// Returns true if `self -> to` is an edge of the workflow.
    pub fn can_transition_to(self, to: Phase) -> bool {
        self.successors().contains(&to)
    }

    /// Returns true for phases with no outgoing edges.
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Returns true for phases that `advance` moves on without user input.
    pub fn runs_unattended(self) -> bool {
        matches!(
            self,
            Phase::Input
                | Phase::Analysis
                | Phase::SpecGeneration
                | Phase::Compilation
                | Phase::DocImpl
        )
    }

    /// Progress value a project is reset to when it enters this phase.
    ///
    /// `Aborted` has no baseline of its own: a stopped project keeps the
    /// progress it had reached.
    pub fn baseline(self) -> Option<f64> {
        let value = match self {
            Phase::Input => 0.0,
            Phase::Analysis => 0.1,
            Phase::SpecGeneration => 0.2,
            Phase::Compilation | Phase::ErrorHandling => 0.4,
            Phase::DocImpl => 0.6,
            Phase::Draft => 0.7,
            Phase::Feedback => 0.8,
            Phase::Refinement => 0.85,
            Phase::Final => 1.0,
            Phase::Aborted => return None,
        };
        Some(value)
    }

    /// Width of the progress band owned by this phase, up to the next
    /// forward phase's baseline.
    pub fn progress_span(self) -> f64 {
        let next = match self {
            Phase::Input => Phase::Analysis,
            Phase::Analysis => Phase::SpecGeneration,
            Phase::SpecGeneration => Phase::Compilation,
            Phase::Compilation | Phase::ErrorHandling => Phase::DocImpl,
            Phase::DocImpl => Phase::Draft,
            Phase::Draft => Phase::Feedback,
            Phase::Feedback => Phase::Refinement,
            Phase::Refinement | Phase::Final | Phase::Aborted => return 0.0,
        };
        match (self.baseline(), next.baseline()) {
            (Some(from), Some(to)) => to - from,
            _ => 0.0,
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Input => "Input Collection",
            Phase::Analysis => "Analysis",
            Phase::SpecGeneration => "Spec Generation",
            Phase::Compilation => "Compilation",
            Phase::ErrorHandling => "Error Handling",
            Phase::DocImpl => "Document Implementation",
            Phase::Draft => "Draft Generation",
            Phase::Feedback => "User Feedback",
            Phase::Refinement => "Refinement",
            Phase::Final => "Finalization",
            Phase::Aborted => "Stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Input => "input",
            Phase::Analysis => "analysis",
            Phase::SpecGeneration => "spec_generation",
            Phase::Compilation => "compilation",
            Phase::ErrorHandling => "error_handling",
            Phase::DocImpl => "doc_impl",
            Phase::Draft => "draft",
            Phase::Feedback => "feedback",
            Phase::Refinement => "refinement",
            Phase::Final => "final",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_have_no_successors() {
        assert!(Phase::Final.is_terminal());
        assert!(Phase::Aborted.is_terminal());
        assert!(!Phase::ErrorHandling.is_terminal());
    }

    #[test]
    fn doc_impl_is_only_reachable_from_compilation() {
        let predecessors: Vec<Phase> = Phase::ALL
            .iter()
            .copied()
            .filter(|p| p.can_transition_to(Phase::DocImpl))
            .collect();
        assert_eq!(predecessors, vec![Phase::Compilation]);
    }

    #[test]
    fn error_handling_is_only_reachable_from_compilation() {
        for phase in Phase::ALL {
            assert_eq!(
                phase.can_transition_to(Phase::ErrorHandling),
                phase == Phase::Compilation,
                "{phase}"
            );
        }
    }

    #[test]
    fn error_handling_exits() {
        assert_eq!(
            Phase::ErrorHandling.successors(),
            &[Phase::Compilation, Phase::Analysis, Phase::Aborted]
        );
    }

    #[test]
    fn only_final_has_full_progress() {
        for phase in Phase::ALL {
            if let Some(baseline) = phase.baseline() {
                assert!((0.0..=1.0).contains(&baseline));
                assert_eq!(baseline == 1.0, phase == Phase::Final, "{phase}");
            }
        }
    }

    #[test]
    fn compilation_span_stops_at_doc_impl() {
        let span = Phase::Compilation.progress_span();
        assert!((span - 0.2).abs() < 1e-9);
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::SpecGeneration).unwrap(),
            "\"spec_generation\""
        );
        assert_eq!(Phase::ErrorHandling.to_string(), "error_handling");
    }
}
