//! User-action dispatch for stalled projects.
//!
//! `decide` is a pure `(level, action)` table: it checks the preconditions of
//! an action against the active error and tells the state machine what to do
//! next. No I/O happens here.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classifier::{ClassifiedError, ErrorLevel, Location, UserAction};
use crate::error::{Error, Result};

/// Marker prefixed to a proof line that was switched off by a fallback.
pub const UNCHECKED_MARKER: &str = "-- unchecked:";

static AUTO_IMPLICIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*auto\s+\w+\s*:[^}]*\}\s*(?:->\s*)?").unwrap());

static REFL_TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bRefl\b").unwrap());

/// What the state machine should do after a user decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Reset the attempt budget and run the full verify loop.
    RerunLoop,
    /// Replace the source with `source` and verify exactly once.
    FallbackOnce { source: String },
    /// Discard the source and go back to analysis.
    Reanalyze,
    /// Stay stalled until corrected source arrives.
    AwaitManualSource,
    /// Stop the project.
    Abort,
}

/// Project facts the dispatch table needs.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub manual_source_supplied: bool,
    pub domain_source: Option<&'a str>,
}

/// Decides how to recover from `error` when the user picks `action`.
pub fn decide(
    error: &ClassifiedError,
    action: UserAction,
    ctx: &RecoveryContext<'_>,
) -> Result<Recovery> {
    if !error.allows(action) {
        return Err(Error::InvalidAction {
            action,
            reason: format!("not offered for {} errors in this state", error.level()),
        });
    }

    match (error.level(), action) {
        (_, UserAction::Retry) => {
            let attempts_left = ctx.attempt_count < ctx.max_attempts;
            if error.auto_fixable() || attempts_left || ctx.manual_source_supplied {
                Ok(Recovery::RerunLoop)
            } else {
                Err(Error::RetryBudgetExhausted {
                    max: ctx.max_attempts,
                })
            }
        }
        (ErrorLevel::Proof, UserAction::Fallback) => {
            let source = ctx
                .domain_source
                .ok_or_else(|| Error::Precondition("no domain source to weaken".to_string()))?;
            let weakened = weaken_proof_obligation(source, error.location()).ok_or_else(|| {
                Error::Precondition("no proof obligation found in domain source".to_string())
            })?;
            Ok(Recovery::FallbackOnce { source: weakened })
        }
        (ErrorLevel::Domain, UserAction::Reanalyze) => Ok(Recovery::Reanalyze),
        (level, action @ (UserAction::Fallback | UserAction::Reanalyze)) => {
            Err(Error::InvalidAction {
                action,
                reason: format!("only applies to {} errors, not {}", required_level(action), level),
            })
        }
        (_, UserAction::Manual) => Ok(Recovery::AwaitManualSource),
        (_, UserAction::Abort) => Ok(Recovery::Abort),
    }
}

fn required_level(action: UserAction) -> ErrorLevel {
    match action {
        UserAction::Fallback => ErrorLevel::Proof,
        UserAction::Reanalyze => ErrorLevel::Domain,
        _ => ErrorLevel::Unknown,
    }
}

/// Weakens one failing proof obligation in `source` to an unchecked assertion.
///
/// The target line is the diagnostic's line, or the first line with a proof
/// construct when there is no usable location. On that line an
/// auto-implicit proof argument is removed; failing that, `Refl` becomes
/// `believe_me ()`; failing that, the line is commented out. Returns `None`
/// when no target line exists.
pub fn weaken_proof_obligation(source: &str, location: Option<Location>) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let target = location
        .and_then(|loc| (loc.line as usize).checked_sub(1))
        .filter(|&index| lines.get(index).is_some_and(|line| is_code(line)))
        .or_else(|| lines.iter().position(|line| has_proof_construct(line)))?;

    let line = lines[target];
    let replacement = if AUTO_IMPLICIT.is_match(line) {
        AUTO_IMPLICIT.replace(line, "").into_owned()
    } else if REFL_TERM.is_match(line) {
        REFL_TERM.replace_all(line, "believe_me ()").into_owned()
    } else {
        let indent = line.len() - line.trim_start().len();
        format!("{}{} {}", &line[..indent], UNCHECKED_MARKER, line.trim_start())
    };

    let mut weakened: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    weakened[target] = replacement;
    let mut out = weakened.join("\n");
    if source.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

fn is_code(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with("--")
}

fn has_proof_construct(line: &str) -> bool {
    is_code(line) && (AUTO_IMPLICIT.is_match(line) || REFL_TERM.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{terminal_actions, ErrorClassifier};

    const SOURCE: &str = "module Contract\n\
                          \n\
                          total : Nat\n\
                          total = 55715000\n\
                          \n\
                          check : {auto prf : total = 50650000 + 5065000} -> Nat\n\
                          check = total\n\
                          \n\
                          lemma : 1 + 1 = 2\n\
                          lemma = Refl\n";

    fn ctx(source: Option<&str>) -> RecoveryContext<'_> {
        RecoveryContext {
            attempt_count: 1,
            max_attempts: 5,
            manual_source_supplied: false,
            domain_source: source,
        }
    }

    fn proof_error() -> ClassifiedError {
        ErrorClassifier::new().classify("Contract.idr:6:9--6:40\nError: Can't solve constraint")
    }

    #[test]
    fn action_outside_available_set_is_invalid() {
        let error = proof_error();
        let err = decide(&error, UserAction::Retry, &ctx(Some(SOURCE))).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidAction {
                action: UserAction::Retry,
                ..
            }
        ));
    }

    #[test]
    fn fallback_weakens_the_located_line() {
        let error = proof_error();
        let recovery = decide(&error, UserAction::Fallback, &ctx(Some(SOURCE))).unwrap();
        let source = match recovery {
            Recovery::FallbackOnce { source } => source,
            other => panic!("expected fallback, got {:?}", other),
        };
        assert!(source.contains("check : Nat"));
        assert!(!source.contains("auto prf"));
        assert!(source.contains("lemma = Refl"));
    }

    #[test]
    fn fallback_without_source_is_precondition() {
        let err = decide(&proof_error(), UserAction::Fallback, &ctx(None)).unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn fallback_on_domain_error_is_invalid() {
        let error = ErrorClassifier::new()
            .classify("Error: Type mismatch between String and Deliverable")
            .with_action(UserAction::Fallback);
        let err = decide(&error, UserAction::Fallback, &ctx(Some(SOURCE))).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { .. }));
    }

    #[test]
    fn reanalyze_requires_domain_level() {
        let domain = ErrorClassifier::new().classify("Error: missing field `payee`");
        assert_eq!(
            decide(&domain, UserAction::Reanalyze, &ctx(None)).unwrap(),
            Recovery::Reanalyze
        );

        let proof = proof_error().with_action(UserAction::Reanalyze);
        assert!(decide(&proof, UserAction::Reanalyze, &ctx(None)).is_err());
    }

    #[test]
    fn retry_after_exhaustion_needs_supplied_source() {
        let error = ErrorClassifier::new()
            .classify("Error: something odd")
            .with_action(UserAction::Retry);
        let exhausted = RecoveryContext {
            attempt_count: 5,
            ..ctx(None)
        };
        assert!(matches!(
            decide(&error, UserAction::Retry, &exhausted),
            Err(Error::RetryBudgetExhausted { max: 5 })
        ));

        let supplied = RecoveryContext {
            manual_source_supplied: true,
            ..exhausted
        };
        assert_eq!(
            decide(&error, UserAction::Retry, &supplied).unwrap(),
            Recovery::RerunLoop
        );
    }

    #[test]
    fn manual_and_abort_always_dispatch() {
        let error = ErrorClassifier::new()
            .classify("parse error")
            .with_actions(terminal_actions());
        assert_eq!(
            decide(&error, UserAction::Manual, &ctx(None)).unwrap(),
            Recovery::AwaitManualSource
        );
        assert_eq!(
            decide(&error, UserAction::Abort, &ctx(None)).unwrap(),
            Recovery::Abort
        );
    }

    #[test]
    fn refl_becomes_believe_me() {
        let location = Some(Location { line: 10, column: 9 });
        let weakened = weaken_proof_obligation(SOURCE, location).unwrap();
        assert!(weakened.contains("lemma = believe_me ()"));
        assert!(weakened.ends_with('\n'));
    }

    #[test]
    fn plain_line_is_commented_out() {
        let location = Some(Location { line: 4, column: 1 });
        let weakened = weaken_proof_obligation(SOURCE, location).unwrap();
        assert!(weakened.contains("-- unchecked: total = 55715000"));
    }

    #[test]
    fn missing_location_targets_first_proof_construct() {
        let weakened = weaken_proof_obligation(SOURCE, None).unwrap();
        assert!(weakened.contains("check : Nat"));
        assert!(weakened.contains("lemma = Refl"));
    }

    #[test]
    fn location_on_blank_line_falls_back_to_search() {
        let weakened = weaken_proof_obligation(SOURCE, Some(Location { line: 2, column: 1 })).unwrap();
        assert!(weakened.contains("check : Nat"));
    }

    #[test]
    fn no_proof_construct_yields_none() {
        assert_eq!(weaken_proof_obligation("module A\n\nx : Nat\n", None), None);
    }

    #[test]
    fn weakening_is_deterministic() {
        let a = weaken_proof_obligation(SOURCE, None);
        let b = weaken_proof_obligation(SOURCE, None);
        assert_eq!(a, b);
    }
}
