//! Deterministic pattern router (Tier 1).
//!
//! One statically ordered table of (intent kind, pattern, builder). Rules
//! are evaluated top to bottom and the first match anywhere in the table
//! wins, so the order below is part of the behavior: every rule that must
//! beat a more general one says which and why.
//!
//! Confidence is fixed. Patterns are hand-curated for precision.

use enms_shared::intent::{IntentKind, RawEntities, RawIntent, Tier};
use enms_shared::whitelist::{parse_number, ExtractedMachine, MachineWhitelist, WhitelistHandle};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Ranking limit when the utterance gives none
pub const DEFAULT_RANKING_LIMIT: u32 = 5;

type Builder = fn(&str, &MachineWhitelist) -> RawEntities;

struct Rule {
    kind: IntentKind,
    name: &'static str,
    pattern: Regex,
    build: Builder,
}

fn rule(kind: IntentKind, name: &'static str, pattern: &str, build: Builder) -> Rule {
    Rule {
        kind,
        name,
        pattern: Regex::new(&format!("(?i){}", pattern)).expect("pattern router rule"),
        build,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // Help first: "help me with energy" is a help request, not energy
        rule(
            IntentKind::Help,
            "help",
            r"^\s*help\b|\bwhat can (you|i) (do|ask)\b|\bhow do i use\b|\bwhat do you know\b",
            no_entities,
        ),
        // Explanation before baseline: every explanation mentions "baseline"
        rule(
            IntentKind::BaselineExplanation,
            "baseline_explanation",
            r"\b(why|explain|explanation)\b.*\bbaseline\b|\bbaseline\b.*\b(explain|explanation|drivers?|factors?|why)\b|\bkey drivers?\b",
            machine_entities,
        ),
        // Model listing before baseline for the same reason
        rule(
            IntentKind::BaselineModels,
            "baseline_models",
            r"\bbaseline\s+models?\b|\bmodels?\s+(are\s+)?(trained|available)\b",
            machine_entities,
        ),
        rule(
            IntentKind::Baseline,
            "baseline",
            r"\bbaseline\b|\bexpected\s+(energy|consumption|usage)\b|\bshould\s+(be\s+)?(using|consuming|use|consume)\b",
            machine_entities,
        ),
        // Anomaly before ranking and power: "power spikes", "top anomalies"
        rule(
            IntentKind::AnomalyDetection,
            "anomaly",
            r"\banomal(y|ies|ous)\b|\bunusual\b|\babnormal\b|\boutliers?\b|\bspikes?\b",
            machine_entities,
        ),
        // Forecast before energy/power: "forecast energy for tomorrow"
        rule(
            IntentKind::Forecast,
            "forecast",
            r"\bforecast\w*\b|\bpredict(ion|ed)?\b|\bprojected?\b|\btomorrow\b|\bnext\s+(hour|day|week|month)\b",
            machine_entities,
        ),
        // Comparison before ranking: "compare the biggest two" names machines
        rule(
            IntentKind::Comparison,
            "comparison",
            r"\bcompar(e|ed|ing|ison)\b|\bversus\b|\bvs\.?\s|\bdifference between\b",
            comparison_entities,
        ),
        // Ranking before cost/power/energy/list: the superlative decides
        rule(
            IntentKind::Ranking,
            "ranking",
            r"\btop\b|\bbottom\s+\w+|\b(highest|lowest|most|least|biggest|largest|smallest|worst|best)\b|\brank(ing|ed)?\b",
            ranking_entities,
        ),
        rule(
            IntentKind::CostAnalysis,
            "cost",
            r"\bcosts?\b|\bcosting\b|\bspend(ing)?\b|\bbill\b|\btariff\b|\bhow much money\b",
            machine_entities,
        ),
        // KPI before performance and overview: "factory kpis", "plant oee"
        rule(
            IntentKind::Kpi,
            "kpi",
            r"\bkpis?\b|\bkey performance\b|\boee\b|\bsec\b|\bspecific energy\b|\bload factor\b|\bpeak demand\b|\bcarbon\b|\bco2\b",
            kpi_entities,
        ),
        // Performance before overview: "how is the plant performing"
        rule(
            IntentKind::Performance,
            "performance",
            r"\bperform(ance|ing)\b|\befficien(t|cy)\b|\bhow well\b",
            machine_entities,
        ),
        rule(
            IntentKind::Report,
            "report",
            r"\breports?\b|\bsummary for\b|\bmonthly summary\b",
            machine_entities,
        ),
        // Energy source before energy: "energy sources", "steam consumption"
        rule(
            IntentKind::EnergySource,
            "energy_source",
            r"\benergy\s+(sources?|types?|mix|carriers?)\b|\b(natural gas|steam|compressed air|electricity)\s+(usage|consumption|use)\b|\bhow much (natural gas|steam|compressed air|electricity)\b",
            machine_entities,
        ),
        // Status before power: "is the boiler running" mentions no metric
        rule(
            IntentKind::MachineStatus,
            "status",
            r"\bstatus\b|\bstate of\b|\b(is|are)\s+(the\s+)?[\w\- ]{1,40}?\s+(running|online|offline|working|operational|idle|down|up|on|off)\s*\??$",
            machine_entities,
        ),
        // Production before list: "how many units were produced"
        rule(
            IntentKind::Production,
            "production",
            r"\bproduc(tion|ed)\b|\bthroughput\b|\bhow many (parts|pieces|units) (were|did|have)\b",
            machine_entities,
        ),
        // List before power/energy/overview: "which machines are in the plant"
        rule(
            IntentKind::MachineList,
            "machine_list",
            r"\b(list|enumerate)\b|\b(which|what|how many|find|show me)\s+(?:(?:the|all|our|my)\s+)*(?:[\w\-]+\s+)?(machines|units|equipment|devices|assets)\b|\b(which|what|how many)\s+[\w\-]+s\s+(are there|do we have|exist|are installed)\b",
            list_entities,
        ),
        rule(
            IntentKind::PowerQuery,
            "power",
            r"\bpower\b|\bkw\b|\bkilowatts?\b|\bwatts?\b|\bdemand\b|\bdrawing\b|\bload\b",
            machine_entities,
        ),
        rule(
            IntentKind::EnergyQuery,
            "energy",
            r"\benergy\b|\bconsum\w*\b|\bkwh\b|\busage\b|\belectricity\b",
            machine_entities,
        ),
        // Overview last: "factory", "plant" and "total" appear in many of the above
        rule(
            IntentKind::FactoryOverview,
            "factory_overview",
            r"\b(factory|plant|facility|site)\b|\boverview\b|\bhow are (we|things)\b|\btotal\b",
            no_entities,
        ),
    ]
});

static EXPLICIT_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:top|bottom|first|best|worst|highest|lowest)\s+(\d+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fifteen|twenty)\b|\b(\d+|two|three|four|five|six|seven|eight|nine|ten)\s+(?:machines|units|consumers|highest|lowest|biggest|largest|most|least)\b",
    )
    .expect("explicit limit pattern")
});

static SINGULAR_PICK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(which|what)\s+(machine|unit|one|equipment|device|asset)\b")
        .expect("singular pick pattern")
});

static ASCENDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(lowest|least|smallest|bottom)\b").expect("ascending pattern")
});

static LIST_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:which|what|how many|find|show me|list)\s+(?:(?:the|all|our|my|of)\s+)*([a-z][\w\-]*)\s+(?:machines|units|equipment|devices|assets)\b",
    )
    .expect("list type pattern")
});

/// Tier 1 router
pub struct PatternRouter {
    whitelist: WhitelistHandle,
    confidence: f64,
}

impl PatternRouter {
    pub fn new(whitelist: MachineWhitelist, confidence: f64) -> Self {
        Self {
            whitelist: WhitelistHandle::new(whitelist),
            confidence,
        }
    }

    /// Swap in a new whitelist snapshot
    pub fn update_whitelist(&self, whitelist: Arc<MachineWhitelist>) {
        self.whitelist.store(whitelist);
    }

    /// First matching rule, or `None` so the caller escalates
    pub fn route(&self, utterance: &str) -> Option<RawIntent> {
        let text = utterance.trim();
        if text.is_empty() {
            return None;
        }
        let rule = RULES.iter().find(|r| r.pattern.is_match(text))?;
        let whitelist = self.whitelist.snapshot();
        debug!("Tier 1: rule '{}' matched '{}'", rule.name, text);

        let mut raw = RawIntent::new(rule.kind, self.confidence, utterance).with_tier(Tier::Heuristic);
        raw.entities = (rule.build)(text, &whitelist);
        Some(raw)
    }
}

/// Kind of the first matching rule; no entity extraction
pub fn classify(utterance: &str) -> Option<IntentKind> {
    RULES
        .iter()
        .find(|r| r.pattern.is_match(utterance.trim()))
        .map(|r| r.kind)
}

fn no_entities(_text: &str, _whitelist: &MachineWhitelist) -> RawEntities {
    RawEntities::default()
}

fn machine_entities(text: &str, whitelist: &MachineWhitelist) -> RawEntities {
    RawEntities {
        machine: whitelist.extract_from_text(text).map(ExtractedMachine::into_string),
        metric: metric_in(text),
        aggregation: aggregation_in(text),
        energy_source: energy_source_in(text),
        ..RawEntities::default()
    }
}

fn comparison_entities(text: &str, whitelist: &MachineWhitelist) -> RawEntities {
    let machines = whitelist.extract_all(text);
    RawEntities {
        machines: (!machines.is_empty()).then_some(machines),
        metric: metric_in(text),
        aggregation: aggregation_in(text),
        ..RawEntities::default()
    }
}

fn kpi_entities(text: &str, whitelist: &MachineWhitelist) -> RawEntities {
    let lower = text.to_lowercase();
    let metric = [
        ("oee", "oee"),
        ("specific energy", "sec"),
        ("sec", "sec"),
        ("load factor", "load_factor"),
        ("peak demand", "peak_demand"),
        ("carbon", "carbon"),
        ("co2", "carbon"),
    ]
    .iter()
    .find(|(word, _)| contains_word(&lower, word))
    .map(|(_, m)| m.to_string())
    .unwrap_or_else(|| "kpi".to_string());

    RawEntities {
        machine: whitelist.extract_from_text(text).map(ExtractedMachine::into_string),
        metric: Some(metric),
        ..RawEntities::default()
    }
}

/// Ranking is factory-wide: a type word narrows the candidate set through
/// `params.machine_type`, never through `machine`.
fn ranking_entities(text: &str, whitelist: &MachineWhitelist) -> RawEntities {
    let limit = EXPLICIT_LIMIT
        .captures(text)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .and_then(|m| parse_number(m.as_str()))
        .or_else(|| SINGULAR_PICK.is_match(text).then_some(1))
        .unwrap_or(DEFAULT_RANKING_LIMIT);

    let mut entities = RawEntities {
        metric: metric_in(text),
        limit: Some(i64::from(limit)),
        ..RawEntities::default()
    };
    let order = if ASCENDING.is_match(text) { "asc" } else { "desc" };
    entities
        .params
        .insert("order".to_string(), Value::String(order.to_string()));
    if let Some(ExtractedMachine::TypeToken(t)) = whitelist.extract_from_text(text) {
        entities.params.insert("machine_type".to_string(), Value::String(t));
    }
    entities
}

/// Listing queries enumerate everything that matches: no limit
fn list_entities(text: &str, whitelist: &MachineWhitelist) -> RawEntities {
    let mut entities = RawEntities::default();
    let machine_type = match whitelist.extract_from_text(text) {
        Some(ExtractedMachine::TypeToken(t)) => Some(t),
        _ => LIST_TYPE
            .captures(text)
            .map(|c| c[1].to_lowercase())
            .filter(|t| !matches!(t.as_str(), "the" | "all" | "our" | "my" | "of")),
    };
    if let Some(t) = machine_type {
        entities.params.insert("machine_type".to_string(), Value::String(t));
    }
    entities
}

/// Power beats energy beats cost when several are mentioned
fn metric_in(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let metric = if ["power", "kw", "kilowatt", "demand", "load"]
        .iter()
        .any(|w| contains_word(&lower, w))
    {
        "power"
    } else if ["energy", "kwh", "consumption", "consumes", "consume", "usage"]
        .iter()
        .any(|w| contains_word(&lower, w))
    {
        "energy"
    } else if ["cost", "costs", "spend", "spending"]
        .iter()
        .any(|w| contains_word(&lower, w))
    {
        "cost"
    } else if contains_word(&lower, "efficient") || contains_word(&lower, "efficiency") {
        "efficiency"
    } else if contains_word(&lower, "production") {
        "production"
    } else {
        return None;
    };
    Some(metric.to_string())
}

fn aggregation_in(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let agg = [
        ("average", "avg"),
        ("avg", "avg"),
        ("mean", "avg"),
        ("total", "total"),
        ("sum", "total"),
        ("peak", "max"),
        ("maximum", "max"),
        ("minimum", "min"),
    ]
    .iter()
    .find(|(word, _)| contains_word(&lower, word))?
    .1;
    Some(agg.to_string())
}

fn energy_source_in(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    [
        ("natural gas", "natural_gas"),
        ("compressed air", "compressed_air"),
        ("electricity", "electricity"),
        ("steam", "steam"),
        ("solar", "solar"),
    ]
    .iter()
    .find(|(word, _)| lower.contains(word))
    .map(|(_, s)| s.to_string())
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .match_indices(word)
        .any(|(i, _)| {
            let before = haystack[..i].chars().next_back();
            let after = haystack[i + word.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
}
