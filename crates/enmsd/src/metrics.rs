//! Prometheus metrics for the voice pipeline.
//!
//! The registry is owned by the pipeline, not global. Exporting it is the
//! host's business; `gather_text` renders the text exposition format.

use enms_shared::clarify::ClarificationKind;
use enms_shared::intent::Tier;
use enms_shared::validation::RejectionReason;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline metrics
#[derive(Clone)]
pub struct VoiceMetrics {
    pub tier_routed_total: IntCounterVec,
    pub parse_latency_seconds: HistogramVec,
    pub validation_rejections_total: IntCounterVec,
    pub clarifications_total: IntCounterVec,
    pub whitelist_refresh_total: IntCounterVec,
    pub sessions_active: IntGauge,

    registry: Arc<Registry>,
}

impl VoiceMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tier_routed_total = register_int_counter_vec_with_registry!(
            "enms_tier_routed_total",
            "Utterances resolved by each tier",
            &["tier"],
            registry
        )?;

        // Tier 1 is sub-millisecond, Tier 3 can take tens of seconds
        let parse_latency_seconds = register_histogram_vec_with_registry!(
            "enms_parse_latency_seconds",
            "Time spent in the orchestrator by resolving tier",
            &["tier"],
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.25, 1.0, 5.0, 15.0, 45.0],
            registry
        )?;

        let validation_rejections_total = register_int_counter_vec_with_registry!(
            "enms_validation_rejections_total",
            "Validator rejections by reason",
            &["reason"],
            registry
        )?;

        let clarifications_total = register_int_counter_vec_with_registry!(
            "enms_clarifications_total",
            "Clarification questions asked by kind",
            &["kind"],
            registry
        )?;

        let whitelist_refresh_total = register_int_counter_vec_with_registry!(
            "enms_whitelist_refresh_total",
            "Whitelist refresh attempts by result",
            &["result"],
            registry
        )?;

        let sessions_active = register_int_gauge_with_registry!(
            "enms_sessions_active",
            "Conversation sessions currently held",
            registry
        )?;

        Ok(Self {
            tier_routed_total,
            parse_latency_seconds,
            validation_rejections_total,
            clarifications_total,
            whitelist_refresh_total,
            sessions_active,
            registry: Arc::new(registry),
        })
    }

    pub fn record_routed(&self, tier: Tier, latency: Duration) {
        let label = tier.to_string();
        self.tier_routed_total.with_label_values(&[label.as_str()]).inc();
        self.parse_latency_seconds
            .with_label_values(&[label.as_str()])
            .observe(latency.as_secs_f64());
    }

    pub fn record_rejection(&self, reason: RejectionReason) {
        self.validation_rejections_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn record_clarification(&self, kind: ClarificationKind) {
        self.clarifications_total
            .with_label_values(&[kind.to_string().as_str()])
            .inc();
    }

    /// `result` is "ok", "empty" or "error"
    pub fn record_refresh(&self, result: &str) {
        self.whitelist_refresh_total.with_label_values(&[result]).inc();
    }

    pub fn set_sessions_active(&self, count: usize) {
        self.sessions_active.set(count as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = VoiceMetrics::new().unwrap();
        metrics.record_routed(Tier::Heuristic, Duration::from_micros(200));
        metrics.record_rejection(RejectionReason::AmbiguousMachine);
        metrics.record_clarification(ClarificationKind::MachineAmbiguous);
        metrics.record_refresh("ok");
        metrics.set_sessions_active(3);

        let text = metrics.gather_text();
        assert!(text.contains("enms_tier_routed_total{tier=\"heuristic\"} 1"));
        assert!(text.contains("enms_validation_rejections_total{reason=\"ambiguous_machine\"} 1"));
        assert!(text.contains("enms_clarifications_total{kind=\"machine_ambiguous\"} 1"));
        assert!(text.contains("enms_sessions_active 3"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = VoiceMetrics::new().unwrap();
        let b = VoiceMetrics::new().unwrap();
        a.record_refresh("error");
        assert!(!b.gather_text().contains("result=\"error\""));
    }
}
