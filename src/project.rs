//! Per-project workflow record and the read-only views derived from it.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{ClassifiedError, UserAction};
use crate::error::{Error, Result};
use crate::phase::Phase;

/// Maximum project name length.
const MAX_NAME_LEN: usize = 64;

/// Number of normalized diagnostics kept on a record.
const ERROR_HISTORY_LEN: usize = 5;

/// Default number of activity entries kept on a record.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 100;

/// Material collected in the input phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInputs {
    /// Kind of document, e.g. "contract", "invoice".
    #[serde(default = "default_document_type")]
    pub document_type: String,
    /// Natural-language requirements.
    pub prompt: String,
    /// Reference documents the model is derived from.
    #[serde(default)]
    pub reference_docs: Vec<String>,
}

fn default_document_type() -> String {
    "contract".to_string()
}

impl ProjectInputs {
    /// Creates inputs for a contract with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            document_type: default_document_type(),
            prompt: prompt.into(),
            reference_docs: Vec::new(),
        }
    }

    /// Adds a reference document.
    pub fn with_reference(mut self, doc: impl Into<String>) -> Self {
        self.reference_docs.push(doc.into());
        self
    }

    /// Sets the document type.
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = document_type.into();
        self
    }
}

/// Why a project is stalled in error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// The classifier's level does not allow unattended retry.
    Classified,
    /// Every attempt of the cycle was used.
    BudgetExhausted,
    /// The same diagnostic kept coming back.
    RepeatedDiagnostic,
    /// An external call ran past its deadline.
    ExternalTimeout,
    /// An external call failed outright.
    ExternalFailure,
}

/// Rendered draft for one version of the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Version the draft was rendered for.
    pub version: u32,
    pub text: Option<String>,
    pub markdown: Option<String>,
    pub csv: Option<String>,
    pub rendered_at: DateTime<Utc>,
}

/// Feedback submitted against a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    /// Version the feedback was given on.
    pub version: u32,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

/// One observed phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// Timestamped activity entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Bounded log of recent activity, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    limit: usize,
    entries: VecDeque<ActivityEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_limit(DEFAULT_ACTIVITY_LIMIT)
    }
}

impl ActivityLog {
    /// Creates a log keeping at most `limit` entries.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Appends an entry, dropping the oldest past the limit.
    pub fn push(&mut self, message: impl Into<String>) {
        self.entries.push_back(ActivityEntry {
            at: Utc::now(),
            message: message.into(),
        });
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Workflow state of one named project.
///
/// Phase, progress, and the active error only change through the crate's
/// state machine, so they are exposed read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    name: String,
    pub inputs: ProjectInputs,
    version: u32,
    phase: Phase,
    progress: f64,
    completed: bool,
    active_error: Option<ClassifiedError>,
    stall_reason: Option<StallReason>,
    pub(crate) attempt_count: u32,
    pub(crate) is_active: bool,
    last_activity: DateTime<Utc>,
    revision: u64,
    pub(crate) domain_source: Option<String>,
    pub(crate) draft: Option<Draft>,
    #[serde(default)]
    feedback_log: Vec<FeedbackEntry>,
    #[serde(default)]
    error_history: Vec<String>,
    #[serde(default)]
    transitions: Vec<PhaseTransition>,
    #[serde(default)]
    activity: ActivityLog,
    #[serde(default)]
    pub(crate) awaiting_manual_source: bool,
    #[serde(default)]
    pub(crate) manual_source_supplied: bool,
}

impl ProjectRecord {
    /// Creates a fresh project in the input phase.
    pub fn new(name: impl Into<String>, inputs: ProjectInputs) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        let mut activity = ActivityLog::default();
        activity.push(format!("project '{}' created", name));
        Ok(Self {
            name,
            inputs,
            version: 1,
            phase: Phase::Input,
            progress: 0.0,
            completed: false,
            active_error: None,
            stall_reason: None,
            attempt_count: 0,
            is_active: false,
            last_activity: Utc::now(),
            revision: 0,
            domain_source: None,
            draft: None,
            feedback_log: Vec::new(),
            error_history: Vec::new(),
            transitions: Vec::new(),
            activity,
            awaiting_manual_source: false,
            manual_source_supplied: false,
        })
    }

    /// Replaces the activity log with an empty one of the given size.
    pub fn with_activity_limit(mut self, limit: usize) -> Self {
        let mut activity = ActivityLog::with_limit(limit);
        for entry in self.activity.entries() {
            activity.push(entry.message.clone());
        }
        self.activity = activity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// True once the project was stopped by the user.
    pub fn stopped(&self) -> bool {
        self.phase == Phase::Aborted
    }

    pub fn active_error(&self) -> Option<&ClassifiedError> {
        self.active_error.as_ref()
    }

    pub fn stall_reason(&self) -> Option<StallReason> {
        self.stall_reason
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Number of commits applied to this record.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn domain_source(&self) -> Option<&str> {
        self.domain_source.as_deref()
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn feedback_log(&self) -> &[FeedbackEntry] {
        &self.feedback_log
    }

    /// Normalized diagnostics of the most recent failed attempts.
    pub fn error_history(&self) -> &[String] {
        &self.error_history
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn awaiting_manual_source(&self) -> bool {
        self.awaiting_manual_source
    }

    /// PascalCase module name derived from the project name.
    pub fn module_name(&self) -> String {
        module_name(&self.name)
    }

    /// Moves the project along one edge of the workflow.
    ///
    /// This is the only place the phase changes. Leaving error handling
    /// clears the active error.
    pub(crate) fn enter(&mut self, to: Phase) -> Result<()> {
        let from = self.phase;
        if !from.can_transition_to(to) {
            return Err(Error::IllegalTransition { from, to });
        }

        self.phase = to;
        if let Some(baseline) = to.baseline() {
            self.progress = baseline;
        }
        self.completed = to == Phase::Final;
        if to != Phase::ErrorHandling {
            self.active_error = None;
            self.stall_reason = None;
            self.awaiting_manual_source = false;
            self.manual_source_supplied = false;
        }
        self.transitions.push(PhaseTransition {
            from,
            to,
            at: Utc::now(),
        });
        self.activity.push(format!("{} -> {}", from.label(), to.label()));
        tracing::info!(project = %self.name, from = %from, to = %to, "phase transition");
        Ok(())
    }

    /// Enters error handling with `error` as the active error.
    pub(crate) fn stall(&mut self, error: ClassifiedError, reason: StallReason) -> Result<()> {
        self.enter(Phase::ErrorHandling)?;
        self.activity.push(format!(
            "stalled on {} error ({:?})",
            error.level(),
            reason
        ));
        self.active_error = Some(error);
        self.stall_reason = Some(reason);
        Ok(())
    }

    /// Swaps the active error for an updated copy. No-op outside error handling.
    pub(crate) fn replace_active_error(&mut self, error: ClassifiedError) {
        if self.phase == Phase::ErrorHandling {
            self.active_error = Some(error);
        }
    }

    /// Raises progress within the current phase. `fraction` is the share of
    /// the phase's band that is done; progress never goes down.
    pub(crate) fn advance_within_phase(&mut self, fraction: f64) {
        let Some(baseline) = self.phase.baseline() else {
            return;
        };
        let fraction = fraction.clamp(0.0, 1.0);
        let target = baseline + self.phase.progress_span() * fraction;
        if target < 1.0 && target > self.progress {
            self.progress = target;
        }
    }

    pub(crate) fn record_failure(&mut self, normalized: String) {
        self.error_history.push(normalized);
        if self.error_history.len() > ERROR_HISTORY_LEN {
            let excess = self.error_history.len() - ERROR_HISTORY_LEN;
            self.error_history.drain(..excess);
        }
    }

    pub(crate) fn clear_error_history(&mut self) {
        self.error_history.clear();
    }

    pub(crate) fn push_feedback(&mut self, text: impl Into<String>) {
        self.feedback_log.push(FeedbackEntry {
            id: Uuid::new_v4(),
            version: self.version,
            text: text.into(),
            submitted_at: Utc::now(),
        });
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
        self.activity.push(format!("version bumped to v{}", self.version));
    }

    pub(crate) fn log(&mut self, message: impl Into<String>) {
        self.activity.push(message);
    }

    /// Stamps the record for a commit.
    pub(crate) fn mark_committed(&mut self) {
        self.revision += 1;
        self.last_activity = Utc::now();
    }

    /// Keeps the revision of `committed` so a restored copy can be written back.
    pub(crate) fn restore_from(&mut self, original: ProjectRecord) {
        let revision = self.revision;
        let last_activity = self.last_activity;
        *self = original;
        self.revision = revision;
        self.last_activity = last_activity;
    }

    /// Actions the user can currently take, if stalled.
    pub fn available_actions(&self) -> Option<BTreeSet<UserAction>> {
        self.active_error
            .as_ref()
            .map(|e| e.available_actions().clone())
    }

    /// Status view for polling clients.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            name: self.name.clone(),
            phase: self.phase,
            progress: self.progress,
            completed: self.completed,
            stopped: self.stopped(),
            active_error: self.active_error.clone(),
            available_actions: self.available_actions(),
            stall_reason: self.stall_reason,
            version: self.version,
            attempt_count: self.attempt_count,
            is_active: self.is_active,
            awaiting_manual_source: self.awaiting_manual_source,
            last_activity: self.last_activity,
        }
    }

    /// Summary row for project listings.
    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            name: self.name.clone(),
            phase: self.phase,
            progress: self.progress,
            completed: self.completed,
            has_error: self.active_error.is_some(),
            version: self.version,
            is_active: self.is_active,
            last_activity: self.last_activity,
        }
    }
}

/// Current status of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub phase: Phase,
    pub progress: f64,
    pub completed: bool,
    /// Stopped by the user; distinct from completed.
    pub stopped: bool,
    pub active_error: Option<ClassifiedError>,
    pub available_actions: Option<BTreeSet<UserAction>>,
    pub stall_reason: Option<StallReason>,
    pub version: u32,
    pub attempt_count: u32,
    pub is_active: bool,
    pub awaiting_manual_source: bool,
    pub last_activity: DateTime<Utc>,
}

/// One row of the project listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub phase: Phase,
    pub progress: f64,
    pub completed: bool,
    pub has_error: bool,
    pub version: u32,
    pub is_active: bool,
    pub last_activity: DateTime<Utc>,
}

/// Checks that `name` is usable as a project identifier and path component.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only ASCII letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}

/// Converts a snake_case or kebab-case name into a PascalCase module name.
///
/// `test_contract_final` becomes `TestContractFinal`.
pub fn module_name(name: &str) -> String {
    let mut module: String = name
        .split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if !module.starts_with(|c: char| c.is_ascii_alphabetic()) {
        module.insert_str(0, "Project");
    }
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassifier;

    fn record() -> ProjectRecord {
        ProjectRecord::new("supply_deal", ProjectInputs::new("draft a supply contract")).unwrap()
    }

    #[test]
    fn new_record_starts_in_input() {
        let record = record();
        assert_eq!(record.phase(), Phase::Input);
        assert_eq!(record.version(), 1);
        assert_eq!(record.progress(), 0.0);
        assert!(!record.completed());
        assert!(record.active_error().is_none());
        assert_eq!(record.revision(), 0);
    }

    #[test]
    fn module_name_is_pascal_case() {
        assert_eq!(module_name("test_contract_final"), "TestContractFinal");
        assert_eq!(module_name("problem_input_v3"), "ProblemInputV3");
        assert_eq!(module_name("my-contract"), "MyContract");
        assert_eq!(module_name("2024_lease"), "Project2024Lease");
    }

    #[test]
    fn name_validation_rejects_path_characters() {
        assert!(validate_name("ok_name-1").is_ok());
        assert!(matches!(validate_name(""), Err(Error::InvalidName { .. })));
        assert!(matches!(validate_name("../etc"), Err(Error::InvalidName { .. })));
        assert!(matches!(
            validate_name(&"a".repeat(65)),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn enter_rejects_edges_outside_the_table() {
        let mut record = record();
        let err = record.enter(Phase::Compilation).unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalTransition {
                from: Phase::Input,
                to: Phase::Compilation
            }
        ));
        assert_eq!(record.phase(), Phase::Input);
        assert!(record.transitions().is_empty());
    }

    #[test]
    fn enter_resets_progress_to_baseline() {
        let mut record = record();
        record.enter(Phase::Analysis).unwrap();
        assert!((record.progress() - 0.1).abs() < 1e-9);
        assert_eq!(record.transitions().len(), 1);
    }

    #[test]
    fn stall_sets_error_and_leaving_clears_it() {
        let mut record = record();
        record.enter(Phase::Analysis).unwrap();
        record.enter(Phase::SpecGeneration).unwrap();
        record.enter(Phase::Compilation).unwrap();

        let error = ErrorClassifier::new().classify("Can't unify");
        record.stall(error, StallReason::Classified).unwrap();
        assert_eq!(record.phase(), Phase::ErrorHandling);
        assert!(record.active_error().is_some());
        assert_eq!(record.stall_reason(), Some(StallReason::Classified));

        record.enter(Phase::Compilation).unwrap();
        assert!(record.active_error().is_none());
        assert!(record.stall_reason().is_none());
    }

    #[test]
    fn progress_within_phase_is_monotonic_and_below_next_baseline() {
        let mut record = record();
        record.enter(Phase::Analysis).unwrap();
        record.enter(Phase::SpecGeneration).unwrap();
        record.enter(Phase::Compilation).unwrap();

        record.advance_within_phase(0.5);
        let halfway = record.progress();
        record.advance_within_phase(0.2);
        assert_eq!(record.progress(), halfway);
        record.advance_within_phase(5.0);
        assert!(record.progress() <= 0.6 + 1e-9);
    }

    #[test]
    fn error_history_keeps_last_five() {
        let mut record = record();
        for i in 0..8 {
            record.record_failure(format!("error {}", i));
        }
        assert_eq!(record.error_history().len(), 5);
        assert_eq!(record.error_history()[0], "error 3");
    }

    #[test]
    fn activity_log_is_bounded() {
        let mut log = ActivityLog::with_limit(3);
        for i in 0..10 {
            log.push(format!("entry {}", i));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries().next().unwrap().message, "entry 7");
    }

    #[test]
    fn restore_keeps_revision() {
        let mut record = record();
        let original = record.clone();
        record.is_active = true;
        record.mark_committed();
        record.restore_from(original);
        assert!(!record.is_active());
        assert_eq!(record.revision(), 1);
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = record();
        let json = serde_json::to_string(&record).unwrap();
        let back: ProjectRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "supply_deal");
        assert_eq!(back.phase(), Phase::Input);
    }

    #[test]
    fn inputs_deserialize_from_yaml() {
        let yaml = r#"
prompt: "Supply agreement for 50,000,000 KRW"
reference_docs:
  - plan.pdf
"#;
        let inputs: ProjectInputs = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(inputs.document_type, "contract");
        assert_eq!(inputs.reference_docs, vec!["plan.pdf"]);
    }
}
