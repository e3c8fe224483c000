//! Adaptive tier orchestrator.
//!
//! Single entry point for parsing. Tier 1, then Tier 2 if it clears its
//! bar, then Tier 3 unconditionally. Each tier runs at most once per query.
//! Whatever tier wins, the time range is re-derived from the raw utterance.

use crate::config::Config;
use crate::generative::{GenerativeFallback, IntentModel};
use crate::metrics::VoiceMetrics;
use crate::pattern_router::PatternRouter;
use crate::temporal::resolve_time_range;
use crate::vocabulary::VocabularyRouter;
use chrono::{DateTime, Utc};
use enms_shared::intent::{RawIntent, Tier};
use enms_shared::whitelist::MachineWhitelist;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What the orchestrator produced and how
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub raw: RawIntent,
    pub tier: Tier,
    pub latency: Duration,
}

pub struct TierOrchestrator {
    router: PatternRouter,
    vocabulary: VocabularyRouter,
    generative: Arc<GenerativeFallback>,
    adapt_min_confidence: f64,
    metrics: VoiceMetrics,
}

impl TierOrchestrator {
    pub fn new(
        config: &Config,
        whitelist: MachineWhitelist,
        model: Arc<dyn IntentModel>,
        metrics: VoiceMetrics,
    ) -> Self {
        Self {
            router: PatternRouter::new(whitelist.clone(), config.tiers.heuristic_confidence),
            vocabulary: VocabularyRouter::new(whitelist.clone()),
            generative: Arc::new(GenerativeFallback::new(model, whitelist, &config.llm)),
            adapt_min_confidence: config.tiers.adapt_min_confidence,
            metrics,
        }
    }

    /// Swap one snapshot into every tier that reads the whitelist
    pub fn update_whitelist(&self, whitelist: Arc<MachineWhitelist>) {
        self.router.update_whitelist(Arc::clone(&whitelist));
        self.vocabulary.update_whitelist(Arc::clone(&whitelist));
        self.generative.update_whitelist(whitelist);
    }

    pub fn generative(&self) -> &Arc<GenerativeFallback> {
        &self.generative
    }

    pub async fn parse(&self, utterance: &str) -> ParseOutcome {
        self.parse_at(utterance, Utc::now()).await
    }

    /// Parse with an explicit clock for time resolution
    pub async fn parse_at(&self, utterance: &str, now: DateTime<Utc>) -> ParseOutcome {
        let started = Instant::now();
        let mut raw = self.route(utterance).await;
        let tier = raw.tier.unwrap_or(Tier::Llm);

        raw.entities.time_range = resolve_time_range(utterance, now);

        let latency = started.elapsed();
        self.metrics.record_routed(tier, latency);
        info!(
            "Routed '{}' via {} -> {} ({:.2}) in {:?}",
            utterance, tier, raw.intent, raw.confidence, latency
        );
        ParseOutcome { raw, tier, latency }
    }

    async fn route(&self, utterance: &str) -> RawIntent {
        if let Some(raw) = self.router.route(utterance) {
            return raw;
        }

        if let Some(raw) = self.vocabulary.route(utterance) {
            if raw.confidence >= self.adapt_min_confidence {
                return raw;
            }
            debug!(
                "Tier 2 candidate {} at {:.2} below {:.2}, escalating",
                raw.intent, raw.confidence, self.adapt_min_confidence
            );
        }

        self.generative.parse(utterance).await
    }
}
