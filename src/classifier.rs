//! Compiler diagnostic classification.
//!
//! Maps raw verification-compiler output onto a recovery level and the set of
//! actions a user may take. Classification is an ordered list of independent
//! rules; the first rule whose markers all match decides the level.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Recovery level of a compiler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Parser or lexer failure. Eligible for unattended repair.
    Syntax,
    /// A proof obligation could not be discharged.
    Proof,
    /// The model does not have the expected domain shape.
    Domain,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorLevel {
    /// Actions recommended for this level.
    pub fn default_actions(self) -> BTreeSet<UserAction> {
        let actions: &[UserAction] = match self {
            ErrorLevel::Syntax => &[UserAction::Retry, UserAction::Manual],
            ErrorLevel::Proof => &[UserAction::Fallback, UserAction::Manual, UserAction::Abort],
            ErrorLevel::Domain => &[UserAction::Reanalyze, UserAction::Manual, UserAction::Abort],
            ErrorLevel::Unknown => &[UserAction::Manual, UserAction::Abort],
        };
        actions.iter().copied().collect()
    }

    /// Short explanation of the cause, shown instead of the raw message.
    pub fn suggestion(self) -> &'static str {
        match self {
            ErrorLevel::Syntax => {
                "The generated model has a syntax error; an automatic repair will be attempted."
            }
            ErrorLevel::Proof => {
                "A dependent-type proof failed. Check the input figures, or continue with the \
                 failing proof weakened to an unchecked assertion."
            }
            ErrorLevel::Domain => {
                "The generated model does not match the expected document structure; the \
                 reference documents need to be analyzed again."
            }
            ErrorLevel::Unknown => "The failure could not be classified; manual review is required.",
        }
    }

    /// Only syntax failures are repaired without user input.
    pub fn is_auto_fixable(self) -> bool {
        self == ErrorLevel::Syntax
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorLevel::Syntax => "syntax",
            ErrorLevel::Proof => "proof",
            ErrorLevel::Domain => "domain",
            ErrorLevel::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Decision a user can take while a project is stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    /// Reset the attempt budget and run the verify loop again.
    Retry,
    /// Weaken the failing proof obligation and verify once more.
    Fallback,
    /// Discard the generated source and analyze again.
    Reanalyze,
    /// Wait for corrected source from the user.
    Manual,
    /// Stop the project permanently.
    Abort,
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserAction::Retry => "retry",
            UserAction::Fallback => "fallback",
            UserAction::Reanalyze => "reanalyze",
            UserAction::Manual => "manual",
            UserAction::Abort => "abort",
        };
        f.write_str(name)
    }
}

impl FromStr for UserAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(UserAction::Retry),
            "fallback" => Ok(UserAction::Fallback),
            "reanalyze" => Ok(UserAction::Reanalyze),
            "manual" => Ok(UserAction::Manual),
            "abort" => Ok(UserAction::Abort),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

/// A `line:column` position inside the compiled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Structured interpretation of a raw diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    level: ErrorLevel,
    message: String,
    location: Option<Location>,
    suggestion: String,
    available_actions: BTreeSet<UserAction>,
    auto_fixable: bool,
}

impl ClassifiedError {
    /// Builds a classification with the level's default actions and suggestion.
    pub fn new(level: ErrorLevel, message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            level,
            message: message.into(),
            location,
            suggestion: level.suggestion().to_string(),
            available_actions: level.default_actions(),
            auto_fixable: level.is_auto_fixable(),
        }
    }

    pub fn level(&self) -> ErrorLevel {
        self.level
    }

    /// The raw diagnostic, verbatim.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn suggestion(&self) -> &str {
        &self.suggestion
    }

    pub fn available_actions(&self) -> &BTreeSet<UserAction> {
        &self.available_actions
    }

    pub fn auto_fixable(&self) -> bool {
        self.auto_fixable
    }

    /// Returns true if `action` may be applied to this error.
    pub fn allows(&self, action: UserAction) -> bool {
        self.available_actions.contains(&action)
    }

    /// Returns a copy whose actions are replaced by `actions`.
    ///
    /// An empty set falls back to `{manual, abort}` so a stalled project can
    /// always be resolved.
    pub fn with_actions(&self, actions: impl IntoIterator<Item = UserAction>) -> Self {
        let mut available_actions: BTreeSet<UserAction> = actions.into_iter().collect();
        if available_actions.is_empty() {
            available_actions = terminal_actions();
        }
        Self {
            available_actions,
            ..self.clone()
        }
    }

    /// Returns a copy with `action` added to the available actions.
    pub fn with_action(&self, action: UserAction) -> Self {
        let mut next = self.clone();
        next.available_actions.insert(action);
        next
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation problem ({})", self.level)?;
        if let Some(location) = self.location {
            writeln!(f, "Location: {}", location)?;
        }
        writeln!(f, "Cause: {}", self.suggestion)?;
        let actions: Vec<String> = self.available_actions.iter().map(|a| a.to_string()).collect();
        write!(f, "Actions: {}", actions.join(", "))?;
        if !self.auto_fixable {
            write!(f, "\nThis error cannot be repaired automatically; a decision is required.")?;
        }
        Ok(())
    }
}

/// The actions left once the retry budget is gone.
pub fn terminal_actions() -> BTreeSet<UserAction> {
    [UserAction::Manual, UserAction::Abort].into_iter().collect()
}

/// A named group of patterns that identify one kind of diagnostic.
#[derive(Debug)]
pub struct MarkerSet {
    name: String,
    patterns: Vec<Regex>,
}

impl MarkerSet {
    /// Compiles a marker set. Patterns are regular expressions.
    pub fn new(name: impl Into<String>, patterns: &[&str]) -> Result<Self> {
        let name = name.into();
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::Config(format!("invalid marker '{}' in {}: {}", p, name, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { name, patterns })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte range of the earliest marker occurrence in `text`.
    pub fn find(&self, text: &str) -> Option<Range<usize>> {
        self.patterns
            .iter()
            .filter_map(|p| p.find(text).map(|m| m.range()))
            .min_by_key(|r| r.start)
    }
}

static SYNTAX_MARKERS: Lazy<Arc<MarkerSet>> = Lazy::new(|| {
    Arc::new(
        MarkerSet::new(
            "syntax",
            &[
                r"(?i)\bparse error\b",
                r"(?i)couldn't parse",
                r"(?i)unexpected token",
                r"(?i)\bunbalanced\b",
                r"(?i)\bunmatched\b",
                r"(?i)\bunterminated\b",
                r"(?i)\bindentation\b",
                r"(?i)\bundefined name\b",
                r"(?i)can't find import",
                r"(?i)\blexer error\b",
            ],
        )
        .unwrap(),
    )
});

static PROOF_MARKERS: Lazy<Arc<MarkerSet>> = Lazy::new(|| {
    Arc::new(
        MarkerSet::new(
            "proof",
            &[
                r"(?i)can't solve constraint",
                r"(?i)can't unify",
                r"\bMismatch between\b",
                r"(?i)\bproof obligation\b",
                r"\bRefl\b",
            ],
        )
        .unwrap(),
    )
});

static DOMAIN_MARKERS: Lazy<Arc<MarkerSet>> = Lazy::new(|| {
    Arc::new(
        MarkerSet::new(
            "domain",
            &[
                r"(?i)type mismatch between",
                r"(?i)\bexpected type\b",
                r"(?i)does not have (a )?field",
                r"(?i)\bmissing field\b",
                r"(?i)\bextra field\b",
                r"(?i)can't find implementation for",
                r"(?i)wrong number of arguments",
                r"(?i)\barity\b",
            ],
        )
        .unwrap(),
    )
});

static GENERIC_ERROR_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\berror\b").unwrap());

/// A `line:column` token, or a `line:column--line:column` range whose start
/// is captured.
static LOCATION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+):(\d+)(?:--\d+:\d+)?\b").unwrap());

static SOURCE_POSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w./-]*?([\w-]+\.idr):(\d+):\d+(?:--\d+:\d+)?").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Maximum length of a normalized diagnostic.
const NORMALIZED_LEN: usize = 150;

/// One predicate → classification step.
///
/// A rule matches when every one of its marker sets finds a hit. The hit of
/// the first set anchors location extraction.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    name: String,
    level: ErrorLevel,
    markers: Vec<Arc<MarkerSet>>,
}

impl ClassificationRule {
    /// Rule that matches when any pattern of `markers` is present.
    pub fn new(name: impl Into<String>, level: ErrorLevel, markers: Arc<MarkerSet>) -> Self {
        Self {
            name: name.into(),
            level,
            markers: vec![markers],
        }
    }

    /// Rule that matches only when every marker set is present.
    pub fn all_of(
        name: impl Into<String>,
        level: ErrorLevel,
        markers: impl IntoIterator<Item = Arc<MarkerSet>>,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            markers: markers.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> ErrorLevel {
        self.level
    }

    fn evaluate(&self, text: &str) -> Option<Range<usize>> {
        let mut anchor = None;
        for (index, set) in self.markers.iter().enumerate() {
            let hit = set.find(text)?;
            if index == 0 {
                anchor = Some(hit);
            }
        }
        anchor
    }
}

/// Ordered rule list turning raw diagnostics into [`ClassifiedError`]s.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the built-in rules:
    /// syntax, proof/domain ambiguity, proof, domain.
    pub fn new() -> Self {
        Self {
            rules: vec![
                ClassificationRule::new("syntax", ErrorLevel::Syntax, SYNTAX_MARKERS.clone()),
                ClassificationRule::all_of(
                    "proof-or-domain",
                    ErrorLevel::Unknown,
                    [PROOF_MARKERS.clone(), DOMAIN_MARKERS.clone()],
                ),
                ClassificationRule::new("proof", ErrorLevel::Proof, PROOF_MARKERS.clone()),
                ClassificationRule::new("domain", ErrorLevel::Domain, DOMAIN_MARKERS.clone()),
            ],
        }
    }

    /// Inserts `rule` at `position` (clamped to the end of the list).
    pub fn with_rule_at(mut self, position: usize, rule: ClassificationRule) -> Self {
        let position = position.min(self.rules.len());
        self.rules.insert(position, rule);
        self
    }

    /// Appends `rule` after the built-in rules.
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classifies a raw diagnostic. Identical text always yields an identical
    /// result.
    pub fn classify(&self, diagnostic: &str) -> ClassifiedError {
        let matched = self
            .rules
            .iter()
            .find_map(|rule| rule.evaluate(diagnostic).map(|anchor| (rule, anchor)));

        let (level, anchor) = match matched {
            Some((rule, anchor)) => {
                tracing::debug!(rule = %rule.name, level = %rule.level, "diagnostic matched rule");
                (rule.level, Some(anchor))
            }
            None => (
                ErrorLevel::Unknown,
                GENERIC_ERROR_MARKER.find(diagnostic).map(|m| m.range()),
            ),
        };

        let location = anchor.and_then(|anchor| extract_location(diagnostic, anchor));
        ClassifiedError::new(level, diagnostic, location)
    }

    /// Classification used when an external call ran past its deadline.
    pub fn classify_timeout(&self, operation: &str, after: Duration) -> ClassifiedError {
        ClassifiedError::new(
            ErrorLevel::Unknown,
            format!("{} timed out after {}s", operation, after.as_secs()),
            None,
        )
    }

    /// Classification used when an external call failed outright.
    pub fn classify_failure(&self, operation: &str, reason: &str) -> ClassifiedError {
        ClassifiedError::new(
            ErrorLevel::Unknown,
            format!("{} failed: {}", operation, reason),
            None,
        )
    }
}

/// Finds the `line:column` token closest to the marker at `anchor`. For a
/// range the start position is reported.
fn extract_location(text: &str, anchor: Range<usize>) -> Option<Location> {
    LOCATION_TOKEN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?.range();
            let line = caps.get(1)?.as_str().parse().ok()?;
            let column = caps.get(2)?.as_str().parse().ok()?;
            let distance = if whole.end <= anchor.start {
                anchor.start - whole.end
            } else if whole.start >= anchor.end {
                whole.start - anchor.end
            } else {
                0
            };
            Some((distance, Location { line, column }))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, location)| location)
}

/// Reduces a diagnostic to a comparable form.
///
/// Source positions keep only the file name and line (a different line means
/// the repair made progress), whitespace is collapsed, and the result is cut
/// to 150 characters.
pub fn normalize_diagnostic(diagnostic: &str) -> String {
    let positions = SOURCE_POSITION.replace_all(diagnostic, "$1:$2");
    let collapsed = WHITESPACE.replace_all(&positions, " ");
    collapsed.trim().chars().take(NORMALIZED_LEN).collect()
}
