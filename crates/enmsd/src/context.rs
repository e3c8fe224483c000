//! Context resolution across turns.
//!
//! Fills entities a follow-up leaves out, decides when to ask instead of
//! answer, interprets the answer to a pending question, and applies smart
//! defaults last.

use crate::pattern_router::DEFAULT_RANKING_LIMIT;
use crate::session::{ConversationSession, PendingClarification};
use chrono::{DateTime, Utc};
use enms_shared::clarify::{ClarificationRequest, ClarifyOutcome};
use enms_shared::intent::{Intent, IntentKind, RawIntent};
use enms_shared::time_range::TimeRange;
use enms_shared::validation::ValidationResult;
use enms_shared::whitelist::{normalize_tokens, parse_number, ExtractedMachine, MachineWhitelist};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static FOLLOW_UP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what about|how about|and the|what'?s the|what is the|check|show me|tell me about)\b")
        .expect("follow-up pattern")
});

static CANCEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(cancel|never\s*mind|forget it|stop|no thanks)\b").expect("cancel pattern")
});

static NUMBER_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:number|option|no\.?)\s*)?(\d+|one|two|three|four|five|six|seven|eight|nine|ten)\s*[.!?]?\s*$",
    )
    .expect("number reply pattern")
});

static ORDINAL_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth)\b")
        .expect("ordinal word pattern")
});

/// "last" only as the whole reply; "from last week" is not a pick
static LAST_PICK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:the\s+)?last(?:\s+one)?(?:\s+please)?\s*[.!?]?\s*$").expect("last pick pattern")
});

static ORDINAL_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)(?:st|nd|rd|th)\b").expect("ordinal digit pattern"));

/// The utterance reads like a follow-up to the previous turn
pub fn is_follow_up(utterance: &str) -> bool {
    FOLLOW_UP.is_match(utterance)
}

/// Fill what a follow-up left out from the session.
///
/// Engages only for an UNKNOWN or machine-less intent phrased as a
/// follow-up. A machine named in the utterance itself beats the carried
/// one. Returns `None` when nothing changed.
pub fn resolve_context_references(
    raw: &RawIntent,
    session: &ConversationSession,
    whitelist: &MachineWhitelist,
) -> Option<RawIntent> {
    let has_machine = raw.entities.machine.is_some() || raw.entities.machines.is_some();
    if !(raw.is_unknown() || !has_machine) || !is_follow_up(&raw.utterance) {
        return None;
    }

    let mut resolved = raw.clone();
    let mut changed = false;

    if raw.is_unknown() {
        let Some(kind) = session.last_intent_kind else {
            return None;
        };
        resolved.intent = kind.as_str().to_string();
        changed = true;
    }
    let kind = resolved.kind();

    if !has_machine && !kind.is_factory_wide() {
        if kind == IntentKind::Comparison {
            let named = whitelist.extract_all(&raw.utterance);
            if named.len() >= 2 {
                resolved.entities.machines = Some(named);
                changed = true;
            } else if let Some(last) = &session.last_machines {
                resolved.entities.machines = Some(last.clone());
                changed = true;
            }
        } else if let Some(found) = whitelist.extract_from_text(&raw.utterance) {
            resolved.entities.machine = Some(found.into_string());
            changed = true;
        } else if let Some(machine) = &session.last_machine {
            resolved.entities.machine = Some(machine.clone());
            changed = true;
        } else if let Some(machines) = &session.last_machines {
            resolved.entities.machines = Some(machines.clone());
            changed = true;
        }
    }

    if resolved.entities.metric.is_none() {
        if let Some(metric) = &session.last_metric {
            resolved.entities.metric = Some(metric.clone());
            changed = true;
        }
    }

    if !changed {
        return None;
    }
    debug!(
        "Context filled '{}': {} machine={:?} machines={:?}",
        raw.utterance, resolved.intent, resolved.entities.machine, resolved.entities.machines
    );
    resolved.from_context = true;
    Some(resolved)
}

/// The question to ask, if any, in priority order: ambiguous machine,
/// unknown intent, missing machine, missing comparison machines, vague time.
pub fn needs_clarification(result: &ValidationResult) -> Option<ClarificationRequest> {
    if result.is_ambiguous() {
        return Some(ClarificationRequest::machine_ambiguous(
            result.ambiguous_candidates.clone(),
        ));
    }
    if result.kind == IntentKind::Unknown {
        return Some(ClarificationRequest::intent_unknown());
    }
    let intent = result.intent.as_ref()?;
    if intent.kind.requires_machine() && !intent.has_machine() {
        return Some(ClarificationRequest::machine_missing(intent.kind));
    }
    if intent.kind == IntentKind::Comparison && intent.machines.as_ref().map_or(0, Vec::len) < 2 {
        return Some(ClarificationRequest::machines_missing());
    }
    if intent.time_range.as_ref().is_some_and(TimeRange::is_ambiguous) {
        return Some(ClarificationRequest::time_ambiguous());
    }
    None
}

/// Interpret a reply while a clarification is pending.
///
/// With candidates: a candidate's name, then a number ("2", "option 2"),
/// then an ordinal ("the first one", "the 2nd"). Without candidates: any
/// whitelist machine named in the reply. Never guesses: anything else,
/// including an out-of-range index, is `Unresolved`.
pub fn parse_clarification_response(
    reply: &str,
    pending: &PendingClarification,
    whitelist: &MachineWhitelist,
) -> ClarifyOutcome {
    if CANCEL.is_match(reply) {
        return ClarifyOutcome::Cancelled;
    }

    if pending.options.is_empty() {
        return match whitelist.extract_from_text(reply) {
            Some(ExtractedMachine::Canonical(machine)) => ClarifyOutcome::Resolved { machine },
            _ => ClarifyOutcome::Unresolved,
        };
    }

    if let Some(machine) = named_option(reply, &pending.options) {
        return ClarifyOutcome::Resolved { machine };
    }

    let index = NUMBER_REPLY
        .captures(reply)
        .and_then(|c| parse_number(&c[1]))
        .or_else(|| ordinal_index(reply, pending.options.len()));

    match index.and_then(|n| pick(&pending.options, n)) {
        Some(machine) => ClarifyOutcome::Resolved { machine },
        None => ClarifyOutcome::Unresolved,
    }
}

/// Longest candidate whose name appears in the reply
fn named_option(reply: &str, options: &[String]) -> Option<String> {
    let reply_tokens = normalize_tokens(reply);
    options
        .iter()
        .filter(|option| {
            let tokens = normalize_tokens(option);
            !tokens.is_empty()
                && tokens.len() <= reply_tokens.len()
                && reply_tokens.windows(tokens.len()).any(|w| w == tokens.as_slice())
        })
        .max_by_key(|option| normalize_tokens(option).len())
        .cloned()
}

fn ordinal_index(reply: &str, count: usize) -> Option<u32> {
    if LAST_PICK.is_match(reply) {
        return u32::try_from(count).ok();
    }
    if let Some(c) = ORDINAL_WORD.captures(reply) {
        let n = match c[1].to_lowercase().as_str() {
            "first" => 1,
            "second" => 2,
            "third" => 3,
            "fourth" => 4,
            "fifth" => 5,
            "sixth" => 6,
            "seventh" => 7,
            "eighth" => 8,
            "ninth" => 9,
            "tenth" => 10,
            _ => return None,
        };
        return Some(n);
    }
    ORDINAL_DIGIT.captures(reply).and_then(|c| c[1].parse().ok())
}

/// 1-indexed, no clamping or wrapping
fn pick(options: &[String], n: u32) -> Option<String> {
    let index = usize::try_from(n).ok()?.checked_sub(1)?;
    options.get(index).cloned()
}

/// Fill still-unset fields. Never overrides an explicit or carried value.
pub fn apply_smart_defaults(mut intent: Intent, now: DateTime<Utc>) -> Intent {
    if intent.time_range.is_none() {
        intent.time_range = match intent.kind {
            IntentKind::EnergyQuery => Some(TimeRange::today(now)),
            IntentKind::PowerQuery | IntentKind::MachineStatus => Some(TimeRange::now(now)),
            IntentKind::AnomalyDetection => Some(TimeRange::last_hours(now, 24)),
            IntentKind::CostAnalysis => Some(TimeRange::this_month(now)),
            _ => None,
        };
    }

    if intent.metric.is_none() {
        intent.metric = intent.kind.default_metric().map(str::to_string);
    }

    if intent.kind == IntentKind::Ranking {
        if intent.limit.is_none() {
            intent.limit = Some(DEFAULT_RANKING_LIMIT);
        }
        if intent.aggregation.is_none() {
            intent.aggregation = Some("total".to_string());
        }
    }

    if !intent.has_machine() && !intent.kind.requires_machine() && intent.kind != IntentKind::Comparison {
        intent.factory_wide = true;
    }
    intent
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pending(options: &[&str]) -> PendingClarification {
        PendingClarification {
            kind: enms_shared::clarify::ClarificationKind::MachineAmbiguous,
            intent_kind: IntentKind::PowerQuery,
            metric: None,
            time_range: None,
            options: options.iter().map(|s| s.to_string()).collect(),
            resolved_machines: vec![],
            created_at: Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_follow_up_markers() {
        assert!(is_follow_up("What about energy?"));
        assert!(is_follow_up("whats the cost"));
        assert!(is_follow_up("and the compressor?"));
        assert!(!is_follow_up("energy of boiler 1"));
    }

    #[test]
    fn test_named_option_prefers_longest() {
        let options = vec!["Compressor-1".to_string(), "Compressor-EU-1".to_string()];
        assert_eq!(
            named_option("compressor eu one please", &options).as_deref(),
            Some("Compressor-EU-1")
        );
        assert_eq!(named_option("compressor 1", &options).as_deref(), Some("Compressor-1"));
        assert_eq!(named_option("the compressor", &options), None);
    }

    #[test]
    fn test_last_ordinal() {
        let wl = MachineWhitelist::default();
        let p = pending(&["A-1", "B-1", "C-1"]);
        assert_eq!(
            parse_clarification_response("the last one", &p, &wl).machine(),
            Some("C-1")
        );
    }

    #[test]
    fn test_last_inside_other_words_is_not_a_pick() {
        let wl = MachineWhitelist::default();
        let p = pending(&["A-1", "B-1", "C-1"]);
        for reply in ["the one from last week", "last time it was fine", "at last"] {
            assert_eq!(
                parse_clarification_response(reply, &p, &wl),
                ClarifyOutcome::Unresolved,
                "{}",
                reply
            );
        }
        assert_eq!(parse_clarification_response("Last.", &p, &wl).machine(), Some("C-1"));
    }

    #[test]
    fn test_zero_is_unresolved() {
        let wl = MachineWhitelist::default();
        let p = pending(&["A-1", "B-1"]);
        assert_eq!(parse_clarification_response("0", &p, &wl), ClarifyOutcome::Unresolved);
    }
}
