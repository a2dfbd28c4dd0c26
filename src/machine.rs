//! Per-project phase state machine.
//!
//! Every operation takes the project record by `&mut` and leaves it in its
//! next state. The caller owns commit and rollback; the machine only commits
//! intermediate states (operation start, compile attempts) so pollers can
//! follow along.

use std::sync::Arc;

use crate::classifier::{ErrorClassifier, UserAction};
use crate::context::{CallOutcome, ExecutionContext};
use crate::coordinator::{CompileOutcome, CompileRetryCoordinator, LoopMode, RetryPolicy};
use crate::error::{Error, Result};
use crate::phase::Phase;
use crate::project::{Draft, ProjectRecord};
use crate::recovery::{self, Recovery, RecoveryContext};
use crate::registry::{commit, ProjectRegistry};
use crate::services::{GenerationRequest, Services, SourceUnit};

/// Drives projects through the workflow.
pub struct PhaseStateMachine {
    services: Services,
    classifier: ErrorClassifier,
    registry: Arc<dyn ProjectRegistry>,
    policy: RetryPolicy,
}

impl PhaseStateMachine {
    pub fn new(
        services: Services,
        classifier: ErrorClassifier,
        registry: Arc<dyn ProjectRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            services,
            classifier,
            registry,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Performs the single forward step of the current phase.
    pub async fn advance(&self, record: &mut ProjectRecord, ctx: &ExecutionContext) -> Result<()> {
        match record.phase() {
            Phase::Input => {
                if record.inputs.prompt.trim().is_empty() {
                    return Err(Error::Precondition("prompt is empty".to_string()));
                }
                if record.inputs.reference_docs.is_empty() {
                    return Err(Error::Precondition(
                        "at least one reference document is required".to_string(),
                    ));
                }
                record.enter(Phase::Analysis)
            }
            Phase::Analysis => self.generate(record, ctx).await,
            Phase::SpecGeneration => {
                if record.domain_source().map_or(true, |s| s.trim().is_empty()) {
                    return Err(Error::Precondition("domain source is empty".to_string()));
                }
                record.attempt_count = 0;
                record.clear_error_history();
                record.enter(Phase::Compilation)
            }
            Phase::Compilation => self.compile(record, ctx, LoopMode::Full).await,
            Phase::DocImpl => self.render(record, ctx).await,
            Phase::Draft => record.enter(Phase::Feedback),
            Phase::Refinement => {
                record.attempt_count = 0;
                record.enter(Phase::Analysis)
            }
            phase @ (Phase::Feedback | Phase::ErrorHandling | Phase::Final | Phase::Aborted) => {
                Err(Error::InvalidPhase {
                    operation: "advance",
                    phase,
                })
            }
        }
    }

    /// Applies a user decision to a stalled project.
    pub async fn apply_user_action(
        &self,
        record: &mut ProjectRecord,
        action: UserAction,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let phase = record.phase();
        if phase != Phase::ErrorHandling {
            return Err(Error::InvalidPhase {
                operation: "apply_user_action",
                phase,
            });
        }
        let error = record
            .active_error()
            .cloned()
            .ok_or_else(|| Error::Precondition("no active error".to_string()))?;

        let decision = recovery::decide(
            &error,
            action,
            &RecoveryContext {
                attempt_count: record.attempt_count(),
                max_attempts: self.policy.effective_max_attempts(),
                manual_source_supplied: record.manual_source_supplied,
                domain_source: record.domain_source(),
            },
        )?;

        tracing::info!(
            project = %record.name(),
            action = %action,
            level = %error.level(),
            "applying user action"
        );
        record.log(format!("user action: {}", action));

        match decision {
            Recovery::RerunLoop => {
                record.enter(Phase::Compilation)?;
                record.attempt_count = 0;
                record.clear_error_history();
                self.compile(record, ctx, LoopMode::Full).await
            }
            Recovery::FallbackOnce { source } => {
                record.domain_source = Some(source);
                record.log("proof obligation weakened to an unchecked assertion");
                record.enter(Phase::Compilation)?;
                record.attempt_count = 0;
                self.compile(record, ctx, LoopMode::SingleAttempt).await
            }
            Recovery::Reanalyze => {
                record.domain_source = None;
                record.attempt_count = 0;
                record.enter(Phase::Analysis)
            }
            Recovery::AwaitManualSource => {
                record.awaiting_manual_source = true;
                Ok(())
            }
            Recovery::Abort => self.abort(record),
        }
    }

    /// Replaces the domain source of a stalled project and offers `retry`.
    pub fn supply_source(&self, record: &mut ProjectRecord, source: &str) -> Result<()> {
        let phase = record.phase();
        if phase != Phase::ErrorHandling {
            return Err(Error::InvalidPhase {
                operation: "supply_source",
                phase,
            });
        }
        if source.trim().is_empty() {
            return Err(Error::Precondition("supplied source is empty".to_string()));
        }

        record.domain_source = Some(source.to_string());
        record.awaiting_manual_source = false;
        record.manual_source_supplied = true;
        if let Some(updated) = record
            .active_error()
            .map(|error| error.with_action(UserAction::Retry))
        {
            record.replace_active_error(updated);
        }
        record.log("corrected source supplied");
        Ok(())
    }

    /// Moves a reviewed draft to `Final`.
    pub fn finalize(&self, record: &mut ProjectRecord) -> Result<()> {
        if !matches!(record.phase(), Phase::Draft | Phase::Feedback) {
            return Err(Error::Precondition(format!(
                "cannot finalize from phase {}",
                record.phase()
            )));
        }
        if record.draft().is_none() {
            return Err(Error::Precondition("no draft to finalize".to_string()));
        }
        if record.active_error().is_some() {
            return Err(Error::Precondition("project has an active error".to_string()));
        }
        record.enter(Phase::Final)?;
        tracing::info!(project = %record.name(), version = record.version(), "project finalized");
        Ok(())
    }

    /// Stops a project between operations. Only phases with an edge to
    /// `Aborted` can be stopped.
    pub fn stop(&self, record: &mut ProjectRecord) -> Result<()> {
        let phase = record.phase();
        if !phase.can_transition_to(Phase::Aborted) {
            return Err(Error::InvalidPhase {
                operation: "cancel",
                phase,
            });
        }
        self.abort(record)
    }

    fn abort(&self, record: &mut ProjectRecord) -> Result<()> {
        record.enter(Phase::Aborted)?;
        record.is_active = false;
        tracing::warn!(project = %record.name(), "project stopped");
        Ok(())
    }

    /// Marks an external call as in flight and commits.
    async fn begin_external(&self, record: &mut ProjectRecord) -> Result<()> {
        record.is_active = true;
        commit(self.registry.as_ref(), record).await
    }

    async fn generate(&self, record: &mut ProjectRecord, ctx: &ExecutionContext) -> Result<()> {
        self.begin_external(record).await?;
        let request = GenerationRequest::from_record(record);
        let deadline = ctx.deadlines().generate;

        let source = match ctx
            .bounded(
                deadline,
                self.services.generator.generate_domain_source(&request),
            )
            .await
        {
            CallOutcome::Completed(result) => result?,
            CallOutcome::TimedOut(after) => {
                return Err(Error::ExternalTimeout {
                    operation: "generation",
                    after,
                })
            }
            CallOutcome::Cancelled => return self.abort(record),
        };

        if source.trim().is_empty() {
            return Err(Error::Generation("generator returned empty source".to_string()));
        }
        record.domain_source = Some(source);
        record.attempt_count = 0;
        record.enter(Phase::SpecGeneration)
    }

    async fn compile(
        &self,
        record: &mut ProjectRecord,
        ctx: &ExecutionContext,
        mode: LoopMode,
    ) -> Result<()> {
        self.begin_external(record).await?;
        let coordinator = CompileRetryCoordinator::new(
            self.services.compiler.as_ref(),
            self.services.generator.as_ref(),
            &self.classifier,
            self.registry.as_ref(),
            self.policy,
        );

        match coordinator.run(record, ctx, mode).await? {
            CompileOutcome::Verified => record.enter(Phase::DocImpl),
            CompileOutcome::Stalled { error, reason } => record.stall(error, reason),
            CompileOutcome::Cancelled => self.abort(record),
        }
    }

    async fn render(&self, record: &mut ProjectRecord, ctx: &ExecutionContext) -> Result<()> {
        let source = record
            .domain_source()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Precondition("no verified source to render".to_string()))?;
        self.begin_external(record).await?;
        let unit = SourceUnit::from_record(record, source);

        let rendered = match ctx
            .bounded(ctx.deadlines().render, self.services.renderer.render(&unit))
            .await
        {
            CallOutcome::Completed(result) => result?,
            CallOutcome::TimedOut(after) => {
                return Err(Error::ExternalTimeout {
                    operation: "rendering",
                    after,
                })
            }
            // No edge leaves DocImpl except Draft; the render is dropped and
            // the project stays put.
            CallOutcome::Cancelled => {
                return Err(Error::Render("rendering cancelled".to_string()))
            }
        };

        if !rendered.has_body() {
            return Err(Error::Render(
                "renderer produced neither text nor markdown".to_string(),
            ));
        }

        record.draft = Some(Draft {
            version: record.version(),
            text: rendered.text,
            markdown: rendered.markdown,
            csv: rendered.csv,
            rendered_at: chrono::Utc::now(),
        });
        record.enter(Phase::Draft)
    }
}
