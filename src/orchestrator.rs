//! Project orchestrator.
//!
//! Entry point for every workflow operation. Operations on one project are
//! serialized by a per-project gate held for the whole operation, including
//! external calls; different projects run in parallel. Queries read the last
//! committed record and never wait on the gate.
//!
//! An operation that fails leaves the project as it was before the call.
//! Cancellation of an in-flight operation goes through a watch channel so the
//! caller never has to wait for the gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::classifier::{ErrorClassifier, UserAction};
use crate::config::DrafterConfig;
use crate::context::{Deadlines, ExecutionContext};
use crate::coordinator::RetryPolicy;
use crate::error::{Error, Result};
use crate::feedback::FeedbackRefinementController;
use crate::machine::PhaseStateMachine;
use crate::phase::Phase;
use crate::project::{Draft, ProjectInputs, ProjectRecord, ProjectSummary, StatusSnapshot};
use crate::registry::{commit, ProjectRegistry};
use crate::services::Services;

/// Serialization gate and cancel signal of one project.
#[derive(Debug)]
struct ProjectSlot {
    gate: Mutex<()>,
    cancel: watch::Sender<bool>,
}

impl ProjectSlot {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            gate: Mutex::new(()),
            cancel,
        }
    }
}

/// A mutating operation.
#[derive(Debug)]
enum Operation {
    Advance,
    GenerateDraft,
    UserAction(UserAction),
    SupplySource(String),
    Feedback(String),
    Finalize,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Advance => "advance",
            Operation::GenerateDraft => "generate_draft",
            Operation::UserAction(_) => "apply_user_action",
            Operation::SupplySource(_) => "supply_source",
            Operation::Feedback(_) => "submit_feedback",
            Operation::Finalize => "finalize",
        }
    }
}

/// Façade over the state machine, registry, and per-project locking.
pub struct ProjectOrchestrator {
    registry: Arc<dyn ProjectRegistry>,
    machine: PhaseStateMachine,
    deadlines: Deadlines,
    activity_log_limit: usize,
    slots: Mutex<HashMap<String, Arc<ProjectSlot>>>,
}

impl ProjectOrchestrator {
    /// Creates an orchestrator with the built-in classifier.
    pub fn new(
        registry: Arc<dyn ProjectRegistry>,
        services: Services,
        config: &DrafterConfig,
    ) -> Self {
        Self::with_classifier(registry, services, config, ErrorClassifier::new())
    }

    /// Creates an orchestrator with a custom classifier.
    pub fn with_classifier(
        registry: Arc<dyn ProjectRegistry>,
        services: Services,
        config: &DrafterConfig,
        classifier: ErrorClassifier,
    ) -> Self {
        let machine = PhaseStateMachine::new(
            services,
            classifier,
            registry.clone(),
            RetryPolicy::from(&config.retry),
        );
        Self {
            registry,
            machine,
            deadlines: Deadlines::from(&config.timeouts),
            activity_log_limit: config.activity_log_limit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a new project in the input phase.
    pub async fn create(&self, name: &str, inputs: ProjectInputs) -> Result<StatusSnapshot> {
        let record = ProjectRecord::new(name, inputs)?.with_activity_limit(self.activity_log_limit);
        self.registry.create(&record).await?;
        tracing::info!(project = %name, "project created");
        Ok(record.snapshot())
    }

    /// Performs one forward step with the configured deadlines.
    pub async fn advance(&self, name: &str) -> Result<StatusSnapshot> {
        self.advance_with_deadlines(name, self.deadlines).await
    }

    /// Performs one forward step, bounding every external call by `timeout`.
    pub async fn advance_with_timeout(&self, name: &str, timeout: Duration) -> Result<StatusSnapshot> {
        self.advance_with_deadlines(name, Deadlines::uniform(timeout)).await
    }

    pub async fn advance_with_deadlines(
        &self,
        name: &str,
        deadlines: Deadlines,
    ) -> Result<StatusSnapshot> {
        let record = self.execute(name, Operation::Advance, deadlines).await?;
        Ok(record.snapshot())
    }

    /// Advances until the project needs a person: a draft to review, a
    /// stalled compilation, or a stopped project.
    pub async fn run_until_settled(&self, name: &str) -> Result<StatusSnapshot> {
        let mut status = self.status(name).await?;
        while status.phase.runs_unattended() {
            status = self.advance(name).await?;
        }
        Ok(status)
    }

    /// Applies a user decision to a stalled project.
    pub async fn apply_user_action(&self, name: &str, action: UserAction) -> Result<StatusSnapshot> {
        let record = self
            .execute(name, Operation::UserAction(action), self.deadlines)
            .await?;
        Ok(record.snapshot())
    }

    /// Supplies corrected domain source while stalled.
    pub async fn supply_source(&self, name: &str, source: &str) -> Result<StatusSnapshot> {
        let record = self
            .execute(name, Operation::SupplySource(source.to_string()), self.deadlines)
            .await?;
        Ok(record.snapshot())
    }

    /// Returns the draft for the current version, rendering it if the
    /// project is ready for rendering.
    pub async fn generate_draft(&self, name: &str) -> Result<Draft> {
        let record = self
            .execute(name, Operation::GenerateDraft, self.deadlines)
            .await?;
        record
            .draft()
            .cloned()
            .ok_or_else(|| Error::Precondition("no draft for the current version".to_string()))
    }

    /// Submits feedback on the current draft.
    pub async fn submit_feedback(&self, name: &str, text: &str) -> Result<StatusSnapshot> {
        let record = self
            .execute(name, Operation::Feedback(text.to_string()), self.deadlines)
            .await?;
        Ok(record.snapshot())
    }

    /// Marks the reviewed draft as final.
    pub async fn finalize(&self, name: &str) -> Result<StatusSnapshot> {
        let record = self
            .execute(name, Operation::Finalize, self.deadlines)
            .await?;
        Ok(record.snapshot())
    }

    /// Stops a project.
    ///
    /// With an operation in flight, its external call is abandoned and the
    /// call returns once that operation has finished. If the operation got
    /// past its last external call, the project is stopped afterwards when
    /// its phase allows it. `Ok` means the project is `Aborted`; a phase with
    /// no edge to `Aborted` is reported as `InvalidPhase`.
    pub async fn cancel(&self, name: &str) -> Result<()> {
        self.registry.get(name).await?;
        let slot = self.slot(name).await;

        let idle = slot.gate.try_lock().ok();
        let signalled = idle.is_none();
        let _gate = match idle {
            Some(gate) => gate,
            None => {
                slot.cancel.send_replace(true);
                tracing::warn!(project = %name, "cancellation signalled to in-flight operation");
                slot.gate.lock().await
            }
        };
        slot.cancel.send_replace(false);

        let mut record = self.registry.get(name).await?;
        if signalled && record.stopped() {
            return Ok(());
        }
        self.machine.stop(&mut record)?;
        commit(self.registry.as_ref(), &mut record).await
    }

    /// Current status. Never waits for an in-flight operation.
    pub async fn status(&self, name: &str) -> Result<StatusSnapshot> {
        Ok(self.registry.get(name).await?.snapshot())
    }

    /// The draft of the current version.
    pub async fn draft(&self, name: &str) -> Result<Draft> {
        let record = self.registry.get(name).await?;
        let phase = record.phase();
        if matches!(
            phase,
            Phase::Input
                | Phase::Analysis
                | Phase::SpecGeneration
                | Phase::Compilation
                | Phase::ErrorHandling
        ) {
            return Err(Error::InvalidPhase {
                operation: "draft",
                phase,
            });
        }
        record
            .draft()
            .cloned()
            .ok_or_else(|| Error::Precondition("no draft for the current version".to_string()))
    }

    /// The full committed record.
    pub async fn record(&self, name: &str) -> Result<ProjectRecord> {
        self.registry.get(name).await
    }

    /// Summaries of all projects.
    pub async fn list(&self) -> Result<Vec<ProjectSummary>> {
        self.registry.list().await
    }

    async fn slot(&self, name: &str) -> Arc<ProjectSlot> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ProjectSlot::new()))
            .clone()
    }

    /// Runs `operation` under the project's gate and commits the result.
    /// On error the record is put back the way it was.
    async fn execute(
        &self,
        name: &str,
        operation: Operation,
        deadlines: Deadlines,
    ) -> Result<ProjectRecord> {
        let slot = self.slot(name).await;
        let _gate = slot.gate.lock().await;

        let mut record = self.registry.get(name).await?;
        let original = record.clone();
        let ctx = ExecutionContext::new(deadlines, slot.cancel.subscribe());
        let operation_name = operation.name();

        // Ok(false): nothing changed, so nothing to commit.
        let result = match operation {
            Operation::Advance => self.machine.advance(&mut record, &ctx).await.map(|()| true),
            Operation::GenerateDraft => match record.phase() {
                Phase::DocImpl => self.machine.advance(&mut record, &ctx).await.map(|()| true),
                Phase::Draft | Phase::Feedback | Phase::Final => Ok(false),
                phase => Err(Error::InvalidPhase {
                    operation: "generate_draft",
                    phase,
                }),
            },
            Operation::UserAction(action) => self
                .machine
                .apply_user_action(&mut record, action, &ctx)
                .await
                .map(|()| true),
            Operation::SupplySource(source) => self
                .machine
                .supply_source(&mut record, &source)
                .map(|()| true),
            Operation::Feedback(text) => FeedbackRefinementController::new(&self.machine)
                .submit_feedback(&mut record, &text)
                .map(|()| true),
            Operation::Finalize => FeedbackRefinementController::new(&self.machine)
                .finalize_current(&mut record)
                .map(|()| true),
        };

        let outcome = match result {
            Ok(false) => Ok(record),
            Ok(true) => {
                record.is_active = false;
                commit(self.registry.as_ref(), &mut record)
                    .await
                    .map(|()| record)
            }
            Err(e) => {
                tracing::warn!(project = %name, operation = operation_name, error = %e, "operation failed");
                if record.revision() != original.revision() {
                    record.restore_from(original);
                    record.is_active = false;
                    if let Err(restore) = commit(self.registry.as_ref(), &mut record).await {
                        tracing::error!(project = %name, error = %restore, "failed to restore project state");
                    }
                }
                Err(e)
            }
        };

        slot.cancel.send_replace(false);
        outcome
    }
}
