//! Validator output.

use crate::intent::{Intent, IntentKind};
use serde::{Deserialize, Serialize};

/// Generic reply when a rejection carries no suggestion
pub const GENERIC_NOT_UNDERSTOOD: &str = "Sorry, I didn't understand that.";

/// Why the validator refused an intent. Also the rejection metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownIntent,
    LowConfidence,
    UnknownMachine,
    FuzzyMachine,
    AmbiguousMachine,
    ComparisonMachines,
    InvalidTimeRange,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownIntent => "unknown_intent",
            Self::LowConfidence => "low_confidence",
            Self::UnknownMachine => "unknown_machine",
            Self::FuzzyMachine => "fuzzy_machine",
            Self::AmbiguousMachine => "ambiguous_machine",
            Self::ComparisonMachines => "comparison_machines",
            Self::InvalidTimeRange => "invalid_time_range",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of validating one raw intent.
///
/// `intent` is present iff `valid`. Non-empty `errors` always means invalid.
/// Warnings ride along either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Coerced kind of the input, kept even when rejected
    pub kind: IntentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// "Did you mean ..." strings
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionReason>,
    /// Canonical names an ambiguous token matched, in whitelist order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguous_candidates: Vec<String>,
    /// For comparisons: the machines that did resolve
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_machines: Vec<String>,
}

impl ValidationResult {
    pub fn accept(intent: Intent, warnings: Vec<String>) -> Self {
        Self {
            valid: true,
            kind: intent.kind,
            intent: Some(intent),
            errors: Vec::new(),
            warnings,
            suggestions: Vec::new(),
            rejection: None,
            ambiguous_candidates: Vec::new(),
            resolved_machines: Vec::new(),
        }
    }

    pub fn reject(kind: IntentKind, reason: RejectionReason, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            kind,
            intent: None,
            errors: vec![error.into()],
            warnings: Vec::new(),
            suggestions: Vec::new(),
            rejection: Some(reason),
            ambiguous_candidates: Vec::new(),
            resolved_machines: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous_candidates.len() > 1
    }

    /// What to tell the user about a rejection
    pub fn user_message(&self) -> String {
        if self.suggestions.is_empty() {
            GENERIC_NOT_UNDERSTOOD.to_string()
        } else {
            self.suggestions.join(" ")
        }
    }
}
