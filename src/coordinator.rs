//! Bounded verify → classify → repair loop for one compilation cycle.

use crate::classifier::{normalize_diagnostic, terminal_actions, ClassifiedError, ErrorClassifier};
use crate::config::{RetryConfig, MAX_ATTEMPTS_CEILING};
use crate::context::{CallOutcome, ExecutionContext};
use crate::error::{Error, Result};
use crate::project::{ProjectRecord, StallReason};
use crate::registry::{commit, ProjectRegistry};
use crate::services::{SourceGenerator, SourceUnit, Verification, VerificationCompiler};

/// Attempt budget of a compilation cycle.
///
/// `max_attempts` is clamped to `1..=MAX_ATTEMPTS_CEILING` wherever it is
/// read, whatever the configuration says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Stall once the same normalized diagnostic was seen this many times in
    /// a row.
    pub repeated_diagnostic_limit: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// The attempt budget actually enforced.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING),
            repeated_diagnostic_limit: config.repeated_diagnostic_limit,
        }
    }
}

/// How many attempts a run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Up to the policy's `max_attempts`.
    Full,
    /// Exactly one verification, used after a proof fallback.
    SingleAttempt,
}

/// Result of a compilation cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Verified,
    /// The loop gave up and a user decision is needed.
    Stalled {
        error: ClassifiedError,
        reason: StallReason,
    },
    /// Cancellation was signalled while a call was in flight.
    Cancelled,
}

/// Runs the compile-retry loop against one project record.
///
/// Every attempt is committed before the compiler runs, so pollers see the
/// attempt counter move. Phase changes are left to the caller.
pub struct CompileRetryCoordinator<'a> {
    compiler: &'a dyn VerificationCompiler,
    generator: &'a dyn SourceGenerator,
    classifier: &'a ErrorClassifier,
    registry: &'a dyn ProjectRegistry,
    policy: RetryPolicy,
}

impl<'a> CompileRetryCoordinator<'a> {
    pub fn new(
        compiler: &'a dyn VerificationCompiler,
        generator: &'a dyn SourceGenerator,
        classifier: &'a ErrorClassifier,
        registry: &'a dyn ProjectRegistry,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            compiler,
            generator,
            classifier,
            registry,
            policy,
        }
    }

    /// Runs attempts until the source verifies, the loop stalls, or the
    /// operation is cancelled.
    pub async fn run(
        &self,
        record: &mut ProjectRecord,
        ctx: &ExecutionContext,
        mode: LoopMode,
    ) -> Result<CompileOutcome> {
        let max = self.policy.effective_max_attempts();
        let limit = match mode {
            LoopMode::Full => max,
            LoopMode::SingleAttempt => (record.attempt_count + 1).min(max),
        };
        let mut previous: Option<String> = None;
        let mut repeats = 0u32;

        while record.attempt_count < limit {
            record.attempt_count += 1;
            let attempt = record.attempt_count;
            record.advance_within_phase(f64::from(attempt) / f64::from(max) * 0.5);
            record.log(format!("compile attempt {}/{}", attempt, max));
            commit(self.registry, record).await?;

            let source = record
                .domain_source
                .clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| Error::Precondition("no domain source to compile".to_string()))?;
            let unit = SourceUnit::from_record(record, source);

            tracing::debug!(project = %unit.project, attempt, max, "verifying domain source");
            let verification = match ctx
                .bounded(ctx.deadlines().verify, self.compiler.verify(&unit))
                .await
            {
                CallOutcome::Completed(Ok(verification)) => verification,
                CallOutcome::Completed(Err(e)) => {
                    let error = self.classifier.classify_failure("verification", &e.to_string());
                    return Ok(self.stall(record, error, StallReason::ExternalFailure));
                }
                CallOutcome::TimedOut(after) => {
                    let error = self.classifier.classify_timeout("verification", after);
                    record.record_failure(normalize_diagnostic(error.message()));
                    return Ok(self.stall(record, error, StallReason::ExternalTimeout));
                }
                CallOutcome::Cancelled => return Ok(CompileOutcome::Cancelled),
            };

            let diagnostic = match verification {
                Verification::Passed => {
                    tracing::info!(project = %unit.project, attempt, "domain source verified");
                    record.log(format!("verified on attempt {}", attempt));
                    return Ok(CompileOutcome::Verified);
                }
                Verification::Failed(diagnostic) => diagnostic,
            };

            let classified = self.classifier.classify(&diagnostic);
            let normalized = normalize_diagnostic(&diagnostic);
            record.record_failure(normalized.clone());
            tracing::debug!(
                project = %unit.project,
                attempt,
                level = %classified.level(),
                "verification failed"
            );

            repeats = if previous.as_deref() == Some(normalized.as_str()) {
                repeats + 1
            } else {
                1
            };
            previous = Some(normalized);

            if let Some(repeat_limit) = self.policy.repeated_diagnostic_limit {
                if repeats >= repeat_limit {
                    let error = classified.with_actions(terminal_actions());
                    return Ok(self.stall(record, error, StallReason::RepeatedDiagnostic));
                }
            }

            if !classified.auto_fixable() {
                return Ok(self.stall(record, classified, StallReason::Classified));
            }

            if record.attempt_count >= limit {
                let error = classified.with_actions(terminal_actions());
                return Ok(self.stall(record, error, StallReason::BudgetExhausted));
            }

            match ctx
                .bounded(
                    ctx.deadlines().generate,
                    self.generator.repair(&unit, &diagnostic),
                )
                .await
            {
                CallOutcome::Completed(Ok(repaired)) => {
                    record.domain_source = Some(repaired);
                    record.log(format!("automatic repair after attempt {}", attempt));
                }
                CallOutcome::Completed(Err(e)) => {
                    let error = self.classifier.classify_failure("repair", &e.to_string());
                    return Ok(self.stall(record, error, StallReason::ExternalFailure));
                }
                CallOutcome::TimedOut(after) => {
                    let error = self.classifier.classify_timeout("repair", after);
                    return Ok(self.stall(record, error, StallReason::ExternalTimeout));
                }
                CallOutcome::Cancelled => return Ok(CompileOutcome::Cancelled),
            }
        }

        // Only reached when called with the budget already spent.
        let error = ClassifiedError::new(
            crate::classifier::ErrorLevel::Unknown,
            format!("no attempts left out of {}", max),
            None,
        )
        .with_actions(terminal_actions());
        Ok(self.stall(record, error, StallReason::BudgetExhausted))
    }

    fn stall(
        &self,
        record: &ProjectRecord,
        error: ClassifiedError,
        reason: StallReason,
    ) -> CompileOutcome {
        tracing::warn!(
            project = %record.name(),
            attempt = record.attempt_count,
            level = %error.level(),
            reason = ?reason,
            "compilation stalled"
        );
        CompileOutcome::Stalled { error, reason }
    }
}
