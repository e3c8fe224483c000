//! Slot-filling vocabulary router (Tier 2).
//!
//! Keywords and phrases tag slots; intent templates declare which slots
//! they require. Every template whose required slots are all present is a
//! candidate and gets its own confidence. The caller decides what is good
//! enough (see `TierConfig::adapt_min_confidence`).

use enms_shared::intent::{IntentKind, RawEntities, RawIntent, Tier};
use enms_shared::whitelist::{ExtractedMachine, MachineWhitelist, WhitelistHandle};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Slot tags a keyword can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Machine,
    PowerMetric,
    EnergyMetric,
    CostMetric,
    KpiMetric,
    StatusCheck,
    Ranking,
    Factory,
    Comparison,
    TimeRange,
    Forecast,
    Anomaly,
    Baseline,
    Explanation,
    Models,
    Production,
    Listing,
    Help,
    Report,
    EnergySource,
    Performance,
}

const VOCABULARY: &[(&str, Slot)] = &[
    ("power", Slot::PowerMetric),
    ("kilowatt", Slot::PowerMetric),
    ("kilowatts", Slot::PowerMetric),
    ("kw", Slot::PowerMetric),
    ("watts", Slot::PowerMetric),
    ("demand", Slot::PowerMetric),
    ("load", Slot::PowerMetric),
    ("drawing", Slot::PowerMetric),
    ("draw", Slot::PowerMetric),
    ("energy", Slot::EnergyMetric),
    ("kwh", Slot::EnergyMetric),
    ("kilowatt hours", Slot::EnergyMetric),
    ("consumption", Slot::EnergyMetric),
    ("consume", Slot::EnergyMetric),
    ("consumed", Slot::EnergyMetric),
    ("consuming", Slot::EnergyMetric),
    ("usage", Slot::EnergyMetric),
    ("used", Slot::EnergyMetric),
    ("cost", Slot::CostMetric),
    ("costs", Slot::CostMetric),
    ("price", Slot::CostMetric),
    ("spend", Slot::CostMetric),
    ("spent", Slot::CostMetric),
    ("bill", Slot::CostMetric),
    ("tariff", Slot::CostMetric),
    ("money", Slot::CostMetric),
    ("expensive", Slot::CostMetric),
    ("kpi", Slot::KpiMetric),
    ("kpis", Slot::KpiMetric),
    ("oee", Slot::KpiMetric),
    ("sec", Slot::KpiMetric),
    ("load factor", Slot::KpiMetric),
    ("carbon", Slot::KpiMetric),
    ("emissions", Slot::KpiMetric),
    ("intensity", Slot::KpiMetric),
    ("status", Slot::StatusCheck),
    ("state", Slot::StatusCheck),
    ("running", Slot::StatusCheck),
    ("online", Slot::StatusCheck),
    ("offline", Slot::StatusCheck),
    ("working", Slot::StatusCheck),
    ("operational", Slot::StatusCheck),
    ("idle", Slot::StatusCheck),
    ("top", Slot::Ranking),
    ("highest", Slot::Ranking),
    ("lowest", Slot::Ranking),
    ("most", Slot::Ranking),
    ("least", Slot::Ranking),
    ("biggest", Slot::Ranking),
    ("largest", Slot::Ranking),
    ("hungriest", Slot::Ranking),
    ("worst", Slot::Ranking),
    ("rank", Slot::Ranking),
    ("ranking", Slot::Ranking),
    ("factory", Slot::Factory),
    ("plant", Slot::Factory),
    ("facility", Slot::Factory),
    ("site", Slot::Factory),
    ("overall", Slot::Factory),
    ("everything", Slot::Factory),
    ("whole", Slot::Factory),
    ("compare", Slot::Comparison),
    ("comparison", Slot::Comparison),
    ("versus", Slot::Comparison),
    ("vs", Slot::Comparison),
    ("against", Slot::Comparison),
    ("difference", Slot::Comparison),
    ("today", Slot::TimeRange),
    ("yesterday", Slot::TimeRange),
    ("now", Slot::TimeRange),
    ("hour", Slot::TimeRange),
    ("hours", Slot::TimeRange),
    ("week", Slot::TimeRange),
    ("month", Slot::TimeRange),
    ("year", Slot::TimeRange),
    ("forecast", Slot::Forecast),
    ("predict", Slot::Forecast),
    ("prediction", Slot::Forecast),
    ("projection", Slot::Forecast),
    ("tomorrow", Slot::Forecast),
    ("upcoming", Slot::Forecast),
    ("anomaly", Slot::Anomaly),
    ("anomalies", Slot::Anomaly),
    ("unusual", Slot::Anomaly),
    ("abnormal", Slot::Anomaly),
    ("spike", Slot::Anomaly),
    ("spikes", Slot::Anomaly),
    ("strange", Slot::Anomaly),
    ("weird", Slot::Anomaly),
    ("outlier", Slot::Anomaly),
    ("outliers", Slot::Anomaly),
    ("baseline", Slot::Baseline),
    ("expected", Slot::Baseline),
    ("why", Slot::Explanation),
    ("explain", Slot::Explanation),
    ("drivers", Slot::Explanation),
    ("factors", Slot::Explanation),
    ("reason", Slot::Explanation),
    ("model", Slot::Models),
    ("models", Slot::Models),
    ("production", Slot::Production),
    ("produced", Slot::Production),
    ("output", Slot::Production),
    ("throughput", Slot::Production),
    ("parts", Slot::Production),
    ("list", Slot::Listing),
    ("machines", Slot::Listing),
    ("equipment", Slot::Listing),
    ("devices", Slot::Listing),
    ("assets", Slot::Listing),
    ("inventory", Slot::Listing),
    ("help", Slot::Help),
    ("assist", Slot::Help),
    ("capabilities", Slot::Help),
    ("report", Slot::Report),
    ("summary", Slot::Report),
    ("summarize", Slot::Report),
    ("electricity", Slot::EnergySource),
    ("natural gas", Slot::EnergySource),
    ("gas", Slot::EnergySource),
    ("steam", Slot::EnergySource),
    ("compressed air", Slot::EnergySource),
    ("solar", Slot::EnergySource),
    ("source", Slot::EnergySource),
    ("sources", Slot::EnergySource),
    ("performance", Slot::Performance),
    ("performing", Slot::Performance),
    ("efficiency", Slot::Performance),
    ("efficient", Slot::Performance),
];

struct Template {
    kind: IntentKind,
    required: &'static [Slot],
    optional: &'static [Slot],
}

/// More specific templates first; ties on confidence keep this order
const TEMPLATES: &[Template] = &[
    Template {
        kind: IntentKind::Help,
        required: &[Slot::Help],
        optional: &[],
    },
    Template {
        kind: IntentKind::BaselineExplanation,
        required: &[Slot::Baseline, Slot::Explanation],
        optional: &[Slot::Machine, Slot::EnergyMetric, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::BaselineModels,
        required: &[Slot::Baseline, Slot::Models],
        optional: &[Slot::Machine, Slot::Listing],
    },
    Template {
        kind: IntentKind::Baseline,
        required: &[Slot::Machine, Slot::Baseline],
        optional: &[Slot::EnergyMetric, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::AnomalyDetection,
        required: &[Slot::Anomaly],
        optional: &[Slot::Machine, Slot::TimeRange, Slot::PowerMetric, Slot::EnergyMetric, Slot::Factory],
    },
    Template {
        kind: IntentKind::Forecast,
        required: &[Slot::Forecast],
        optional: &[Slot::Machine, Slot::EnergyMetric, Slot::PowerMetric, Slot::Factory, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::Comparison,
        required: &[Slot::Comparison, Slot::Machine],
        optional: &[Slot::EnergyMetric, Slot::PowerMetric, Slot::CostMetric, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::Ranking,
        required: &[Slot::Ranking],
        optional: &[
            Slot::EnergyMetric,
            Slot::PowerMetric,
            Slot::CostMetric,
            Slot::Listing,
            Slot::TimeRange,
            Slot::Factory,
        ],
    },
    Template {
        kind: IntentKind::CostAnalysis,
        required: &[Slot::CostMetric],
        optional: &[Slot::Machine, Slot::Factory, Slot::TimeRange, Slot::EnergyMetric],
    },
    Template {
        kind: IntentKind::Kpi,
        required: &[Slot::KpiMetric],
        optional: &[Slot::Factory, Slot::Machine, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::Performance,
        required: &[Slot::Performance],
        optional: &[Slot::Machine, Slot::Factory, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::Report,
        required: &[Slot::Report],
        optional: &[Slot::Factory, Slot::TimeRange, Slot::EnergyMetric],
    },
    Template {
        kind: IntentKind::EnergySource,
        required: &[Slot::EnergySource],
        optional: &[Slot::EnergyMetric, Slot::Machine, Slot::Factory, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::MachineStatus,
        required: &[Slot::Machine, Slot::StatusCheck],
        optional: &[Slot::TimeRange],
    },
    Template {
        kind: IntentKind::PowerQuery,
        required: &[Slot::Machine, Slot::PowerMetric],
        optional: &[Slot::TimeRange],
    },
    Template {
        kind: IntentKind::EnergyQuery,
        required: &[Slot::Machine, Slot::EnergyMetric],
        optional: &[Slot::TimeRange],
    },
    Template {
        kind: IntentKind::EnergyQuery,
        required: &[Slot::Factory, Slot::EnergyMetric],
        optional: &[Slot::TimeRange],
    },
    Template {
        kind: IntentKind::Production,
        required: &[Slot::Production],
        optional: &[Slot::Machine, Slot::Factory, Slot::TimeRange],
    },
    Template {
        kind: IntentKind::MachineList,
        required: &[Slot::Listing],
        optional: &[Slot::Factory],
    },
    Template {
        kind: IntentKind::FactoryOverview,
        required: &[Slot::Factory],
        optional: &[Slot::TimeRange, Slot::StatusCheck],
    },
];

/// Slot hits for one utterance
#[derive(Debug, Clone, Default)]
pub struct SlotHits {
    slots: HashSet<Slot>,
    machine: Option<ExtractedMachine>,
    machines: Vec<String>,
}

impl SlotHits {
    pub fn contains(&self, slot: Slot) -> bool {
        self.slots.contains(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Tier 2 router
pub struct VocabularyRouter {
    whitelist: WhitelistHandle,
}

impl VocabularyRouter {
    pub fn new(whitelist: MachineWhitelist) -> Self {
        Self {
            whitelist: WhitelistHandle::new(whitelist),
        }
    }

    pub fn update_whitelist(&self, whitelist: Arc<MachineWhitelist>) {
        self.whitelist.store(whitelist);
    }

    /// Tag every slot the utterance fills
    pub fn tag(&self, utterance: &str) -> SlotHits {
        let padded = format!(" {} ", words(utterance).join(" "));
        let mut hits = SlotHits::default();
        for (phrase, slot) in VOCABULARY {
            if padded.contains(&format!(" {} ", phrase)) {
                hits.slots.insert(*slot);
            }
        }

        let whitelist = self.whitelist.snapshot();
        if let Some(found) = whitelist.extract_from_text(utterance) {
            hits.slots.insert(Slot::Machine);
            hits.machine = Some(found);
            hits.machines = whitelist.extract_all(utterance);
        }
        hits
    }

    /// Best-scoring template, with the engine's own confidence.
    ///
    /// Returns a result even when it is weak; the orchestrator applies
    /// the acceptance bar.
    pub fn route(&self, utterance: &str) -> Option<RawIntent> {
        let hits = self.tag(utterance);
        if hits.is_empty() {
            return None;
        }

        let mut best: Option<(&Template, f64)> = None;
        for template in TEMPLATES {
            if !template.required.iter().all(|s| hits.contains(*s)) {
                continue;
            }
            let score = score(template, &hits);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((template, score));
            }
        }
        let (template, confidence) = best?;
        debug!(
            "Tier 2: {} at {:.2} from {} slot(s)",
            template.kind,
            confidence,
            hits.len()
        );

        let mut raw = RawIntent::new(template.kind, confidence, utterance).with_tier(Tier::Adapt);
        raw.entities = entities(template.kind, utterance, hits);
        Some(raw)
    }
}

/// Required slots weigh most, optional ones a little; slots no part of
/// the template explains pull the score down.
fn score(template: &Template, hits: &SlotHits) -> f64 {
    let required = template.required.len();
    let optional = template.optional.iter().filter(|s| hits.contains(**s)).count();
    let explained = (required + optional) as f64;
    let coverage = explained / hits.len().max(1) as f64;
    let base = (0.45 + 0.15 * required as f64 + 0.05 * optional as f64).min(0.95);
    base * (0.5 + 0.5 * coverage.min(1.0))
}

fn entities(kind: IntentKind, utterance: &str, hits: SlotHits) -> RawEntities {
    let metric = [
        (Slot::PowerMetric, "power"),
        (Slot::EnergyMetric, "energy"),
        (Slot::CostMetric, "cost"),
        (Slot::KpiMetric, "kpi"),
    ]
    .iter()
    .find(|(slot, _)| hits.contains(*slot))
    .map(|(_, m)| m.to_string());

    let mut entities = RawEntities {
        metric,
        ..RawEntities::default()
    };

    match kind {
        IntentKind::Comparison => {
            entities.machines = (!hits.machines.is_empty()).then_some(hits.machines);
        }
        IntentKind::Ranking => {
            entities.limit = first_bare_integer(utterance);
            if let Some(ExtractedMachine::TypeToken(t)) = hits.machine {
                entities.params.insert("machine_type".to_string(), Value::String(t));
            }
        }
        _ => entities.machine = hits.machine.map(ExtractedMachine::into_string),
    }
    entities
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// A whitespace-separated token that is all digits. "Boiler-1" is not one.
fn first_bare_integer(utterance: &str) -> Option<i64> {
    utterance
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '?' | '.' | ',' | '!')))
        .find(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()))
        .and_then(|w| w.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> VocabularyRouter {
        VocabularyRouter::new(MachineWhitelist::new(["Boiler-1", "Compressor-1", "Compressor-EU-1"]))
    }

    #[test]
    fn test_empty_utterance_is_none() {
        assert!(router().route("").is_none());
        assert!(router().route("asdkj qwerty zxcvbn").is_none());
    }

    #[test]
    fn test_required_slots_must_all_be_present() {
        let hits = router().tag("kilowatts please");
        assert!(hits.contains(Slot::PowerMetric));
        assert!(!hits.contains(Slot::Machine));
        // power_query needs a machine too
        let raw = router().route("kilowatts please");
        assert!(raw.is_none());
    }

    #[test]
    fn test_machine_and_metric() {
        let raw = router().route("boiler-1 kilowatts").unwrap();
        assert_eq!(raw.kind(), IntentKind::PowerQuery);
        assert_eq!(raw.entities.machine.as_deref(), Some("Boiler-1"));
        assert_eq!(raw.tier, Some(Tier::Adapt));
        assert!(raw.confidence >= 0.6);
    }

    #[test]
    fn test_unexplained_slots_lower_confidence() {
        let clean = router().route("boiler-1 kilowatts").unwrap();
        let noisy = router().route("boiler-1 kilowatts weird tariff summary").unwrap();
        assert!(noisy.confidence < clean.confidence);
    }

    #[test]
    fn test_first_bare_integer() {
        assert_eq!(first_bare_integer("hungriest 4 machines"), Some(4));
        assert_eq!(first_bare_integer("Boiler-1 kw"), None);
        assert_eq!(first_bare_integer("the 7?"), Some(7));
    }
}
