//! Configuration management for enmsd.
//!
//! Loads settings from /etc/enms/voice.toml or uses defaults. Every field
//! has a serde default, so a partial file is as good as a full one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/enms/voice.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/enms/voice.toml";

/// Tier acceptance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier 2 results below this are treated as no match
    #[serde(default = "default_adapt_min_confidence")]
    pub adapt_min_confidence: f64,

    /// Fixed confidence reported by the pattern router
    #[serde(default = "default_heuristic_confidence")]
    pub heuristic_confidence: f64,
}

fn default_adapt_min_confidence() -> f64 {
    0.6
}

fn default_heuristic_confidence() -> f64 {
    0.95
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            adapt_min_confidence: default_adapt_min_confidence(),
            heuristic_confidence: default_heuristic_confidence(),
        }
    }
}

/// Validator policy. The floors trade clarification frequency against
/// guessing, so they live here rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Minimum confidence after floor boosting
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Similarity (0-100) needed for a "did you mean" suggestion
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: u8,

    /// Confidence floor for pattern-router matches
    #[serde(default = "default_heuristic_floor")]
    pub heuristic_floor: f64,

    /// Confidence floor for accepted vocabulary-router matches
    #[serde(default = "default_adapt_floor")]
    pub adapt_floor: f64,

    /// Confidence floor for intents completed from conversation context
    #[serde(default = "default_context_floor")]
    pub context_floor: f64,
}

fn default_confidence_threshold() -> f64 {
    0.85
}

fn default_fuzzy_threshold() -> u8 {
    enms_shared::whitelist::DEFAULT_FUZZY_THRESHOLD
}

fn default_heuristic_floor() -> f64 {
    0.95
}

/// Equal to the default gate: a Tier 2 match that cleared
/// `adapt_min_confidence` is trusted on confidence, and the gate then only
/// bites on Tier 3 output. Lower it to make the gate re-judge Tier 2.
fn default_adapt_floor() -> f64 {
    0.85
}

fn default_context_floor() -> f64 {
    0.90
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            fuzzy_threshold: default_fuzzy_threshold(),
            heuristic_floor: default_heuristic_floor(),
            adapt_floor: default_adapt_floor(),
            context_floor: default_context_floor(),
        }
    }
}

/// Local generative model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model runtime endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Small instruct model, CPU only
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-query inference timeout. Covers a cold load on slow hardware.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Model load timeout
    #[serde(default = "default_llm_load_timeout")]
    pub load_timeout_secs: u64,

    /// Concurrent inferences allowed against the shared model (1 = serialized)
    #[serde(default = "default_llm_max_concurrent")]
    pub max_concurrent: usize,

    /// Load the model in the background at startup
    #[serde(default = "default_true")]
    pub prewarm: bool,

    /// How long the runtime keeps the model resident
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5:0.5b-instruct".to_string()
}

fn default_llm_timeout() -> u64 {
    45
}

fn default_llm_load_timeout() -> u64 {
    120
}

fn default_llm_max_concurrent() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> String {
    "30m".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            load_timeout_secs: default_llm_load_timeout(),
            max_concurrent: default_llm_max_concurrent(),
            prewarm: default_true(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// Conversation session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is expired
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,

    /// Turns kept per session
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Pending clarifications older than this are dropped
    #[serde(default = "default_clarification_timeout")]
    pub clarification_timeout_secs: u64,
}

fn default_session_timeout() -> u64 {
    1800
}

fn default_max_history() -> usize {
    10
}

fn default_clarification_timeout() -> u64 {
    120
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            max_history: default_max_history(),
            clarification_timeout_secs: default_clarification_timeout(),
        }
    }
}

/// Intervals for the host's scheduler. The core never schedules itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_whitelist_refresh")]
    pub whitelist_refresh_secs: u64,

    #[serde(default = "default_session_cleanup")]
    pub session_cleanup_secs: u64,
}

fn default_whitelist_refresh() -> u64 {
    86_400
}

fn default_session_cleanup() -> u64 {
    3_600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            whitelist_refresh_secs: default_whitelist_refresh(),
            session_cleanup_secs: default_session_cleanup(),
        }
    }
}

/// Machine roster source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_roster_api")]
    pub api_base: String,

    #[serde(default = "default_roster_timeout")]
    pub timeout_secs: u64,

    /// Whitelist served until the first successful refresh
    #[serde(default)]
    pub seed_machines: Vec<String>,
}

fn default_roster_api() -> String {
    "http://localhost:8001/api/v1".to_string()
}

fn default_roster_timeout() -> u64 {
    10
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            api_base: default_roster_api(),
            timeout_secs: default_roster_timeout(),
            seed_machines: Vec::new(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tiers: TierConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub roster: RosterConfig,
}

impl Config {
    /// Load config from the standard paths, falling back to defaults
    pub fn load() -> Self {
        for path in [CONFIG_PATH, DEFAULT_CONFIG_PATH] {
            if Path::new(path).exists() {
                match Self::load_from(path) {
                    Ok(config) => {
                        info!("Loaded config from {}", path);
                        return config;
                    }
                    Err(e) => warn!("Ignoring config at {}: {:#}", path, e),
                }
            }
        }
        info!("No config file found, using defaults");
        Self::default()
    }

    /// Load config from an explicit path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    /// Reject values that would silently disable a safety gate
    fn check(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                anyhow::bail!("{} must be within [0, 1], got {}", name, v)
            }
        };
        unit("tiers.adapt_min_confidence", self.tiers.adapt_min_confidence)?;
        unit("tiers.heuristic_confidence", self.tiers.heuristic_confidence)?;
        unit("validator.confidence_threshold", self.validator.confidence_threshold)?;
        unit("validator.heuristic_floor", self.validator.heuristic_floor)?;
        unit("validator.adapt_floor", self.validator.adapt_floor)?;
        unit("validator.context_floor", self.validator.context_floor)?;
        if self.validator.fuzzy_threshold > 100 {
            anyhow::bail!("validator.fuzzy_threshold must be 0-100");
        }
        if self.session.max_history == 0 {
            anyhow::bail!("session.max_history must be at least 1");
        }
        if self.llm.max_concurrent == 0 {
            anyhow::bail!("llm.max_concurrent must be at least 1");
        }
        Ok(())
    }
}
