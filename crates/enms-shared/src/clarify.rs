//! Clarification questions.
//!
//! When utterance plus context cannot pin down the entities an intent
//! needs, the pipeline asks instead of guessing. Only machine ambiguity
//! comes with a candidate list the user can pick from.

use crate::intent::IntentKind;
use serde::{Deserialize, Serialize};

/// What the clarification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    MachineAmbiguous,
    MachineMissing,
    MachinesMissing,
    IntentUnknown,
    TimeAmbiguous,
}

impl std::fmt::Display for ClarificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MachineAmbiguous => "machine_ambiguous",
            Self::MachineMissing => "machine_missing",
            Self::MachinesMissing => "machines_missing",
            Self::IntentUnknown => "intent_unknown",
            Self::TimeAmbiguous => "time_ambiguous",
        };
        write!(f, "{}", s)
    }
}

/// A question back to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub kind: ClarificationKind,
    pub prompt: String,
    /// Candidate machines, 1-indexed when spoken (machine_ambiguous only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ClarificationRequest {
    pub fn machine_ambiguous(options: Vec<String>) -> Self {
        Self {
            kind: ClarificationKind::MachineAmbiguous,
            prompt: format_options_prompt(&options),
            options,
        }
    }

    pub fn machine_missing(kind: IntentKind) -> Self {
        let what = match kind {
            IntentKind::PowerQuery => "power for",
            IntentKind::MachineStatus => "status of",
            IntentKind::Baseline | IntentKind::BaselineExplanation => "baseline for",
            _ => "data for",
        };
        Self {
            kind: ClarificationKind::MachineMissing,
            prompt: format!("Which machine would you like the {}?", what),
            options: Vec::new(),
        }
    }

    pub fn machines_missing() -> Self {
        Self {
            kind: ClarificationKind::MachinesMissing,
            prompt: "Which machines would you like to compare? Please name at least two."
                .to_string(),
            options: Vec::new(),
        }
    }

    pub fn intent_unknown() -> Self {
        Self {
            kind: ClarificationKind::IntentUnknown,
            prompt: "I'm not sure what you'd like to know. You can ask about power, energy, \
                     status, costs or rankings of your machines."
                .to_string(),
            options: Vec::new(),
        }
    }

    pub fn time_ambiguous() -> Self {
        Self {
            kind: ClarificationKind::TimeAmbiguous,
            prompt: "Which time period do you mean? For example today, yesterday or last week."
                .to_string(),
            options: Vec::new(),
        }
    }
}

/// Prompt wording depends on how many candidates there are:
/// two read as "X or Y", three as "X, Y, or Z", more as a numbered list.
pub fn format_options_prompt(options: &[String]) -> String {
    match options {
        [] => "Which machine did you mean?".to_string(),
        [only] => format!("Did you mean {}?", only),
        [a, b] => format!("Did you mean {} or {}?", a, b),
        [a, b, c] => format!("Did you mean {}, {}, or {}?", a, b, c),
        many => {
            let listed: Vec<String> = many
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{}. {}", i + 1, name))
                .collect();
            format!(
                "I found {} matching machines. Which one did you mean? {}.",
                many.len(),
                listed.join("; ")
            )
        }
    }
}

/// Result of interpreting a reply to a pending clarification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClarifyOutcome {
    /// Reply mapped to exactly one candidate
    Resolved { machine: String },
    /// User backed out ("cancel", "never mind")
    Cancelled,
    /// Could not map the reply; keep waiting
    Unresolved,
}

impl ClarifyOutcome {
    pub fn machine(&self) -> Option<&str> {
        match self {
            Self::Resolved { machine } => Some(machine),
            _ => None,
        }
    }
}
