//! Zero-trust validator.
//!
//! Every tier's output is re-verified here, the deterministic ones
//! included. Layers run in order and the first hard failure ends
//! validation:
//!
//! 1. schema coercion (kind, confidence, limit, time range)
//! 2. UNKNOWN is rejected outright
//! 3. confidence gate, after tier floors
//! 4. machine resolution against the whitelist (machine-scoped intents)
//! 5. per-machine checks for comparisons, all failures collected
//! 6. metric check (warning only)
//! 7. cross-field cleanup for factory-wide intents
//!
//! Pure: the same raw intent and whitelist always give the same result.

use crate::config::ValidatorConfig;
use enms_shared::clarify::format_options_prompt;
use enms_shared::intent::{is_known_metric, Intent, IntentKind, RawIntent, Tier};
use enms_shared::validation::{RejectionReason, ValidationResult};
use enms_shared::whitelist::{MachineMatch, MachineWhitelist, WhitelistHandle};
use std::sync::Arc;
use tracing::{debug, warn};

pub const UNKNOWN_INTENT_ERROR: &str = "Unknown intent type";
pub const REPHRASE_SUGGESTION: &str = "Try rephrasing your question";

/// Factory-wide intents that keep a machine as a filter when the
/// utterance uses one of these phrasings. Must match what the executor
/// can filter on.
const MACHINE_FILTER_EXCEPTIONS: &[(IntentKind, &[&str])] = &[
    (IntentKind::Kpi, &["for", "of"]),
    (IntentKind::Report, &["report for", "report on", "report of"]),
    (IntentKind::BaselineModels, &["for"]),
];

/// Outcome of resolving one machine token
enum Resolved {
    One(String),
    FanOut(Vec<String>),
    Failed(ValidationResult),
}

pub struct Validator {
    whitelist: WhitelistHandle,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(whitelist: MachineWhitelist, config: ValidatorConfig) -> Self {
        Self {
            whitelist: WhitelistHandle::new(whitelist),
            config,
        }
    }

    pub fn update_whitelist(&self, whitelist: Arc<MachineWhitelist>) {
        self.whitelist.store(whitelist);
    }

    pub fn validate(&self, raw: &RawIntent) -> ValidationResult {
        let whitelist = self.whitelist.snapshot();
        let result = self.validate_with(raw, &whitelist);
        if let Some(reason) = result.rejection {
            warn!(
                "Rejected '{}' ({}): {}",
                raw.utterance,
                reason,
                result.errors.join("; ")
            );
        }
        result
    }

    fn validate_with(&self, raw: &RawIntent, whitelist: &MachineWhitelist) -> ValidationResult {
        let mut warnings = Vec::new();

        // Layer 1: schema coercion
        let kind = raw.kind();
        if kind == IntentKind::Unknown && !raw.intent.is_empty() && raw.intent != "unknown" {
            debug!("Coerced unrecognized intent '{}' to unknown", raw.intent);
        }
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            warnings.push("Confidence was not a number".to_string());
            0.0
        };
        let limit = match raw.entities.limit {
            Some(n) if n > 0 => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            Some(n) => {
                warnings.push(format!("Ignoring invalid limit {}", n));
                None
            }
            None => None,
        };
        if let Some(range) = &raw.entities.time_range {
            if !range.is_ordered() {
                return ValidationResult::reject(
                    kind,
                    RejectionReason::InvalidTimeRange,
                    "Time range starts after it ends",
                )
                .with_warnings(warnings);
            }
        }

        // Layer 2: UNKNOWN
        if kind == IntentKind::Unknown {
            if let Some(fault) = raw.error_annotation() {
                warnings.push(format!("Model fault: {}", fault));
            }
            return ValidationResult::reject(kind, RejectionReason::UnknownIntent, UNKNOWN_INTENT_ERROR)
                .with_suggestion(REPHRASE_SUGGESTION)
                .with_warnings(warnings);
        }

        // Layer 3: confidence gate
        let effective = self.floored_confidence(raw, confidence);
        if effective < self.config.confidence_threshold {
            return ValidationResult::reject(
                kind,
                RejectionReason::LowConfidence,
                format!(
                    "Confidence {:.2} below threshold {:.2}",
                    effective, self.config.confidence_threshold
                ),
            )
            .with_suggestion(REPHRASE_SUGGESTION)
            .with_warnings(warnings);
        }

        let mut intent = Intent::new(kind, effective, &raw.utterance);
        intent.limit = limit;
        intent.time_range = raw.entities.time_range.clone();
        intent.aggregation = raw.entities.aggregation.clone();
        intent.energy_source = raw.entities.energy_source.clone();
        intent.params = raw.entities.params.clone();

        if kind == IntentKind::Comparison {
            // Layer 5: every machine checked, failures reported together
            let mut tokens: Vec<String> = raw.entities.machine.iter().cloned().collect();
            tokens.extend(raw.entities.machines.iter().flatten().cloned());
            match self.validate_comparison(&tokens, whitelist) {
                Ok(machines) => {
                    intent.machines = (!machines.is_empty()).then_some(machines);
                }
                Err(failed) => return failed.with_warnings(warnings),
            }
        } else if !kind.is_factory_wide() {
            // Layer 4: single machine, or an explicit list
            if let Some(token) = &raw.entities.machine {
                match self.resolve_machine(kind, token, whitelist) {
                    Resolved::One(name) => intent.machine = Some(name),
                    Resolved::FanOut(names) => {
                        warnings.push(format!(
                            "'{}' matches {} machines, answering for all of them",
                            token,
                            names.len()
                        ));
                        intent.machines = Some(names);
                    }
                    Resolved::Failed(failed) => return failed.with_warnings(warnings),
                }
            }
            if let Some(tokens) = &raw.entities.machines {
                let mut names = intent.machines.take().unwrap_or_default();
                for token in tokens {
                    match self.resolve_machine(kind, token, whitelist) {
                        Resolved::One(name) => push_unique(&mut names, name),
                        Resolved::FanOut(more) => more.into_iter().for_each(|n| push_unique(&mut names, n)),
                        Resolved::Failed(failed) => return failed.with_warnings(warnings),
                    }
                }
                intent.machines = (!names.is_empty()).then_some(names);
            }
        }

        // Layer 6: metric, soft
        if let Some(metric) = &raw.entities.metric {
            let metric = metric.trim().to_lowercase();
            if !is_known_metric(&metric) {
                warnings.push(format!("Unrecognized metric '{}'", metric));
            }
            intent.metric = Some(metric);
        }

        // Layer 7: cross-field cleanup
        if kind.is_factory_wide() {
            if let Some(token) = &raw.entities.machine {
                if keeps_machine_filter(kind, &raw.utterance) {
                    match whitelist.lookup(token, self.config.fuzzy_threshold) {
                        MachineMatch::Exact(name) | MachineMatch::Normalized(name) => {
                            intent.machine = Some(name)
                        }
                        _ => warnings.push(format!(
                            "Ignoring unresolved machine filter '{}' for {}",
                            token, kind
                        )),
                    }
                } else {
                    warnings.push(format!("Ignoring machine '{}' for factory-wide {}", token, kind));
                }
            }
            if raw.entities.machines.is_some() {
                warnings.push(format!("Ignoring machine list for factory-wide {}", kind));
            }
        }

        ValidationResult::accept(intent, warnings)
    }

    /// Deterministic tiers and context-carried intents get a floor
    fn floored_confidence(&self, raw: &RawIntent, confidence: f64) -> f64 {
        let tier_floor = match raw.tier {
            Some(Tier::Heuristic) => self.config.heuristic_floor,
            Some(Tier::Adapt) => self.config.adapt_floor,
            Some(Tier::Llm) | None => 0.0,
        };
        let context_floor = if raw.from_context {
            self.config.context_floor
        } else {
            0.0
        };
        confidence.max(tier_floor).max(context_floor)
    }

    fn resolve_machine(&self, kind: IntentKind, token: &str, whitelist: &MachineWhitelist) -> Resolved {
        match whitelist.lookup(token, self.config.fuzzy_threshold) {
            MachineMatch::Exact(name) | MachineMatch::Normalized(name) => Resolved::One(name),
            MachineMatch::Ambiguous(candidates) if kind.fans_out_on_ambiguity() => {
                Resolved::FanOut(candidates)
            }
            MachineMatch::Ambiguous(candidates) => {
                let mut result = ValidationResult::reject(
                    kind,
                    RejectionReason::AmbiguousMachine,
                    format!("Machine '{}' is ambiguous", token),
                )
                .with_suggestion(format_options_prompt(&candidates));
                result.ambiguous_candidates = candidates;
                Resolved::Failed(result)
            }
            MachineMatch::Fuzzy { suggestion, .. } => Resolved::Failed(
                ValidationResult::reject(
                    kind,
                    RejectionReason::FuzzyMachine,
                    format!("Unknown machine '{}'", token),
                )
                .with_suggestion(format!("Did you mean {}?", suggestion)),
            ),
            MachineMatch::NotFound => Resolved::Failed(
                ValidationResult::reject(
                    kind,
                    RejectionReason::UnknownMachine,
                    format!("Unknown machine '{}'", token),
                )
                .with_suggestion(known_machines_hint(whitelist)),
            ),
        }
    }

    fn validate_comparison(
        &self,
        tokens: &[String],
        whitelist: &MachineWhitelist,
    ) -> Result<Vec<String>, ValidationResult> {
        let mut resolved: Vec<String> = Vec::new();
        let mut errors = Vec::new();
        let mut suggestions = Vec::new();
        // Only one question at a time: the first ambiguous member is asked about
        let mut ambiguous: Option<Vec<String>> = None;

        for token in tokens {
            match whitelist.lookup(token, self.config.fuzzy_threshold) {
                MachineMatch::Exact(name) | MachineMatch::Normalized(name) => {
                    push_unique(&mut resolved, name)
                }
                MachineMatch::Ambiguous(candidates) => {
                    errors.push(format!("Machine '{}' is ambiguous", token));
                    suggestions.push(format_options_prompt(&candidates));
                    ambiguous.get_or_insert(candidates);
                }
                MachineMatch::Fuzzy { suggestion, .. } => {
                    errors.push(format!("Unknown machine '{}'", token));
                    suggestions.push(format!("Did you mean {}?", suggestion));
                }
                MachineMatch::NotFound => errors.push(format!("Unknown machine '{}'", token)),
            }
        }

        if errors.is_empty() {
            return Ok(resolved);
        }
        let mut result = ValidationResult::reject(
            IntentKind::Comparison,
            RejectionReason::ComparisonMachines,
            errors.remove(0),
        );
        result.errors.extend(errors);
        result.suggestions = suggestions;
        result.resolved_machines = resolved;
        result.ambiguous_candidates = ambiguous.unwrap_or_default();
        Err(result)
    }
}

fn keeps_machine_filter(kind: IntentKind, utterance: &str) -> bool {
    let padded = format!(" {} ", utterance.to_lowercase());
    MACHINE_FILTER_EXCEPTIONS
        .iter()
        .filter(|(k, _)| *k == kind)
        .flat_map(|(_, keywords)| keywords.iter())
        .any(|kw| padded.contains(&format!(" {} ", kw)))
}

fn known_machines_hint(whitelist: &MachineWhitelist) -> String {
    let names = whitelist.names();
    if names.is_empty() {
        return REPHRASE_SUGGESTION.to_string();
    }
    let shown: Vec<String> = names.into_iter().take(3).collect();
    format!("Known machines include {}", shown.join(", "))
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(
            MachineWhitelist::new(["Boiler-1", "Compressor-1", "Compressor-EU-1"]),
            ValidatorConfig::default(),
        )
    }

    fn raw(kind: IntentKind, confidence: f64, tier: Tier) -> RawIntent {
        RawIntent::new(kind, confidence, "test").with_tier(tier)
    }

    #[test]
    fn test_nan_confidence_is_rejected() {
        let mut r = raw(IntentKind::PowerQuery, f64::NAN, Tier::Llm);
        r.entities.machine = Some("Boiler-1".into());
        let result = validator().validate(&r);
        assert_eq!(result.rejection, Some(RejectionReason::LowConfidence));
    }

    #[test]
    fn test_heuristic_floor_lifts_confidence() {
        let mut r = raw(IntentKind::PowerQuery, 0.5, Tier::Heuristic);
        r.entities.machine = Some("boiler-1".into());
        let result = validator().validate(&r);
        assert!(result.valid);
        assert_eq!(result.intent.unwrap().confidence, 0.95);
    }

    #[test]
    fn test_llm_has_no_floor() {
        let mut r = raw(IntentKind::PowerQuery, 0.8, Tier::Llm);
        r.entities.machine = Some("Boiler-1".into());
        assert!(!validator().validate(&r).valid);
    }

    #[test]
    fn test_negative_limit_dropped_with_warning() {
        let mut r = raw(IntentKind::Ranking, 0.95, Tier::Heuristic);
        r.entities.limit = Some(-2);
        let result = validator().validate(&r);
        assert!(result.valid);
        assert_eq!(result.intent.unwrap().limit, None);
        assert!(result.warnings.iter().any(|w| w.contains("limit")));
    }

    #[test]
    fn test_keeps_machine_filter_needs_whole_words() {
        assert!(keeps_machine_filter(IntentKind::Kpi, "oee for boiler-1"));
        assert!(!keeps_machine_filter(IntentKind::Kpi, "boiler-1 forecast kpi"));
        assert!(!keeps_machine_filter(IntentKind::Ranking, "top 3 for boiler"));
    }
}
