//! Intent model.
//!
//! Tiers emit a loosely typed [`RawIntent`]; only the validator turns it into
//! a typed [`Intent`]. Everything downstream of the validator works on
//! `Intent` and never sees tier output directly.

use crate::time_range::TimeRange;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of things a user can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    PowerQuery,
    EnergyQuery,
    MachineStatus,
    FactoryOverview,
    Comparison,
    Ranking,
    MachineList,
    AnomalyDetection,
    CostAnalysis,
    Forecast,
    Baseline,
    BaselineModels,
    BaselineExplanation,
    Kpi,
    Performance,
    Production,
    EnergySource,
    Report,
    Help,
    Unknown,
}

pub const ALL_INTENT_KINDS: &[IntentKind] = &[
    IntentKind::PowerQuery,
    IntentKind::EnergyQuery,
    IntentKind::MachineStatus,
    IntentKind::FactoryOverview,
    IntentKind::Comparison,
    IntentKind::Ranking,
    IntentKind::MachineList,
    IntentKind::AnomalyDetection,
    IntentKind::CostAnalysis,
    IntentKind::Forecast,
    IntentKind::Baseline,
    IntentKind::BaselineModels,
    IntentKind::BaselineExplanation,
    IntentKind::Kpi,
    IntentKind::Performance,
    IntentKind::Production,
    IntentKind::EnergySource,
    IntentKind::Report,
    IntentKind::Help,
    IntentKind::Unknown,
];

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PowerQuery => "power_query",
            Self::EnergyQuery => "energy_query",
            Self::MachineStatus => "machine_status",
            Self::FactoryOverview => "factory_overview",
            Self::Comparison => "comparison",
            Self::Ranking => "ranking",
            Self::MachineList => "machine_list",
            Self::AnomalyDetection => "anomaly_detection",
            Self::CostAnalysis => "cost_analysis",
            Self::Forecast => "forecast",
            Self::Baseline => "baseline",
            Self::BaselineModels => "baseline_models",
            Self::BaselineExplanation => "baseline_explanation",
            Self::Kpi => "kpi",
            Self::Performance => "performance",
            Self::Production => "production",
            Self::EnergySource => "energy_source",
            Self::Report => "report",
            Self::Help => "help",
            Self::Unknown => "unknown",
        }
    }

    /// Parse an intent name as emitted by any tier.
    ///
    /// Tolerates case, spaces/hyphens and a few short aliases the
    /// generative tier is known to produce. Anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        let kind = match key.as_str() {
            "power_query" | "power" => Self::PowerQuery,
            "energy_query" | "energy" => Self::EnergyQuery,
            "machine_status" | "status" => Self::MachineStatus,
            "factory_overview" | "overview" => Self::FactoryOverview,
            "comparison" | "compare" => Self::Comparison,
            "ranking" | "top_n" | "top" => Self::Ranking,
            "machine_list" | "list_machines" => Self::MachineList,
            "anomaly_detection" | "anomaly" | "anomalies" => Self::AnomalyDetection,
            "cost_analysis" | "cost" => Self::CostAnalysis,
            "forecast" => Self::Forecast,
            "baseline" | "baseline_prediction" => Self::Baseline,
            "baseline_models" => Self::BaselineModels,
            "baseline_explanation" => Self::BaselineExplanation,
            "kpi" => Self::Kpi,
            "performance" => Self::Performance,
            "production" => Self::Production,
            "energy_source" | "energy_type" => Self::EnergySource,
            "report" => Self::Report,
            "help" => Self::Help,
            "unknown" => Self::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    /// Intents whose answer covers the whole factory; a machine is at most
    /// a filter for them, never a required target.
    pub fn is_factory_wide(&self) -> bool {
        match self {
            Self::FactoryOverview
            | Self::Ranking
            | Self::MachineList
            | Self::Kpi
            | Self::Report
            | Self::BaselineModels
            | Self::Help => true,
            Self::PowerQuery
            | Self::EnergyQuery
            | Self::MachineStatus
            | Self::Comparison
            | Self::AnomalyDetection
            | Self::CostAnalysis
            | Self::Forecast
            | Self::Baseline
            | Self::BaselineExplanation
            | Self::Performance
            | Self::Production
            | Self::EnergySource
            | Self::Unknown => false,
        }
    }

    /// Intents that cannot be answered without a target machine
    pub fn requires_machine(&self) -> bool {
        match self {
            Self::PowerQuery
            | Self::MachineStatus
            | Self::Baseline
            | Self::BaselineExplanation => true,
            Self::EnergyQuery
            | Self::FactoryOverview
            | Self::Comparison
            | Self::Ranking
            | Self::MachineList
            | Self::AnomalyDetection
            | Self::CostAnalysis
            | Self::Forecast
            | Self::BaselineModels
            | Self::Kpi
            | Self::Performance
            | Self::Production
            | Self::EnergySource
            | Self::Report
            | Self::Help
            | Self::Unknown => false,
        }
    }

    /// Intents that expand an ambiguous machine token to every match
    /// instead of asking. Status lookups, baseline predictions and energy
    /// totals aggregate cleanly over several machines; nothing else does.
    pub fn fans_out_on_ambiguity(&self) -> bool {
        matches!(
            self,
            Self::MachineStatus | Self::Baseline | Self::EnergyQuery
        )
    }

    /// Metric implied by the intent when the utterance names none
    pub fn default_metric(&self) -> Option<&'static str> {
        match self {
            Self::PowerQuery => Some("power"),
            Self::EnergyQuery | Self::Baseline | Self::Forecast => Some("energy"),
            Self::MachineStatus => Some("status"),
            Self::CostAnalysis => Some("cost"),
            Self::Kpi => Some("kpi"),
            Self::Production => Some("production"),
            Self::Ranking | Self::Comparison => Some("energy"),
            _ => None,
        }
    }
}

/// Metrics the executor knows how to fetch. Anything else is a warning.
pub const KNOWN_METRICS: &[&str] = &[
    "power",
    "energy",
    "cost",
    "status",
    "kpi",
    "sec",
    "oee",
    "load_factor",
    "peak_demand",
    "demand",
    "efficiency",
    "production",
    "carbon",
    "baseline",
];

pub fn is_known_metric(metric: &str) -> bool {
    let m = metric.trim().to_lowercase().replace([' ', '-'], "_");
    KNOWN_METRICS.contains(&m.as_str())
}

/// Which matching strategy produced an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 1: ordered regex table
    Heuristic,
    /// Tier 2: slot-filling vocabulary
    Adapt,
    /// Tier 3: constrained generative model
    Llm,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Heuristic => "heuristic",
            Self::Adapt => "adapt",
            Self::Llm => "llm",
        };
        write!(f, "{}", s)
    }
}

/// Entities as a tier reported them, nothing verified
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEntities {
    #[serde(deserialize_with = "lenient::opt_string")]
    pub machine: Option<String>,
    #[serde(deserialize_with = "lenient::opt_string_list")]
    pub machines: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub metric: Option<String>,
    /// Never read from model output: time is re-derived from the utterance
    #[serde(skip_deserializing)]
    pub time_range: Option<TimeRange>,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub aggregation: Option<String>,
    #[serde(deserialize_with = "lenient::opt_i64")]
    pub limit: Option<i64>,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub energy_source: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
}

/// Untrusted output of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIntent {
    #[serde(default, alias = "intent_kind", deserialize_with = "lenient::string")]
    pub intent: String,
    #[serde(default, deserialize_with = "lenient::confidence")]
    pub confidence: f64,
    #[serde(flatten)]
    pub entities: RawEntities,
    #[serde(default)]
    pub utterance: String,
    #[serde(default, skip_deserializing)]
    pub tier: Option<Tier>,
    /// Entities or kind were carried over from the conversation
    #[serde(default, skip_deserializing)]
    pub from_context: bool,
}

/// Key under which a failing tier records why it produced UNKNOWN
pub const ERROR_PARAM: &str = "error";

impl RawIntent {
    pub fn new(kind: IntentKind, confidence: f64, utterance: &str) -> Self {
        Self {
            intent: kind.as_str().to_string(),
            confidence,
            entities: RawEntities::default(),
            utterance: utterance.to_string(),
            tier: None,
            from_context: false,
        }
    }

    /// UNKNOWN with zero confidence, optionally annotated with the fault
    pub fn unknown(utterance: &str, error: Option<String>) -> Self {
        let mut raw = Self::new(IntentKind::Unknown, 0.0, utterance);
        if let Some(e) = error {
            raw.entities
                .params
                .insert(ERROR_PARAM.to_string(), serde_json::Value::String(e));
        }
        raw
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Parsed kind, `Unknown` when the string is not recognized
    pub fn kind(&self) -> IntentKind {
        IntentKind::parse(&self.intent).unwrap_or(IntentKind::Unknown)
    }

    pub fn is_unknown(&self) -> bool {
        self.kind() == IntentKind::Unknown
    }

    pub fn error_annotation(&self) -> Option<&str> {
        self.entities
            .params
            .get(ERROR_PARAM)
            .and_then(|v| v.as_str())
    }
}

/// A validated intent. Machine names in it are canonical whitelist names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_source: Option<String>,
    /// No machine given and none carried from context: answer for the plant
    #[serde(default)]
    pub factory_wide: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
    pub utterance: String,
}

impl Intent {
    pub fn new(kind: IntentKind, confidence: f64, utterance: &str) -> Self {
        Self {
            kind,
            confidence,
            machine: None,
            machines: None,
            metric: None,
            time_range: None,
            aggregation: None,
            limit: None,
            energy_source: None,
            factory_wide: false,
            params: HashMap::new(),
            utterance: utterance.to_string(),
        }
    }

    /// UNKNOWN carries nothing but the utterance
    pub fn unknown(utterance: &str) -> Self {
        Self::new(IntentKind::Unknown, 0.0, utterance)
    }

    pub fn has_machine(&self) -> bool {
        self.machine.is_some() || self.machines.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Back to the untrusted form, for re-verification after context fill
    pub fn to_raw(&self, tier: Option<Tier>) -> RawIntent {
        RawIntent {
            intent: self.kind.as_str().to_string(),
            confidence: self.confidence,
            entities: RawEntities {
                machine: self.machine.clone(),
                machines: self.machines.clone(),
                metric: self.metric.clone(),
                time_range: self.time_range.clone(),
                aggregation: self.aggregation.clone(),
                limit: self.limit.map(i64::from),
                energy_source: self.energy_source.clone(),
                params: self.params.clone(),
            },
            utterance: self.utterance.clone(),
            tier,
            from_context: false,
        }
    }
}

/// Deserializers that accept whatever shape a small model manages to emit.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value_to_string(v: Value) -> Option<String> {
        match v {
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(t.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(value_to_string(Value::deserialize(d)?).unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(value_to_string(Value::deserialize(d)?))
    }

    pub fn opt_string_list<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Vec<String>>, D::Error> {
        let list = match Value::deserialize(d)? {
            Value::Array(items) => items.into_iter().filter_map(value_to_string).collect(),
            Value::String(s) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        Ok(if list.is_empty() { None } else { Some(list) })
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// Unparseable confidence becomes NaN so the validator rejects it
    pub fn confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::String(s) => s.trim().trim_end_matches('%').parse().unwrap_or(f64::NAN),
            Value::Null => 0.0,
            _ => f64::NAN,
        })
    }
}
