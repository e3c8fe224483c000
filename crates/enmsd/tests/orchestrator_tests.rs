//! Tests for orchestrator.rs and the Tier 3 wrapper it drives

mod common;

use common::ScriptedModel;
use enms_shared::error::VoiceError;
use enms_shared::intent::{IntentKind, Tier};
use enms_shared::whitelist::MachineWhitelist;
use enmsd::config::Config;
use enmsd::metrics::VoiceMetrics;
use enmsd::orchestrator::TierOrchestrator;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator_with(config: &Config, model: ScriptedModel) -> (TierOrchestrator, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let orchestrator = TierOrchestrator::new(
        config,
        MachineWhitelist::new(common::plant_machines()),
        model.clone(),
        VoiceMetrics::new().unwrap(),
    );
    (orchestrator, model)
}

fn orchestrator(model: ScriptedModel) -> (TierOrchestrator, Arc<ScriptedModel>) {
    orchestrator_with(&common::test_config(), model)
}

#[tokio::test]
async fn test_tier1_hit_never_reaches_the_model() {
    let (orch, model) = orchestrator(ScriptedModel::new());
    let outcome = orch.parse_at("top 3", common::t0()).await;
    assert_eq!(outcome.tier, Tier::Heuristic);
    assert_eq!(outcome.raw.kind(), IntentKind::Ranking);
    assert_eq!(model.calls(), 0);
    assert!(!orch.generative().is_loaded());
}

#[tokio::test]
async fn test_confident_tier2_result_accepted() {
    let (orch, model) = orchestrator(ScriptedModel::new());
    let outcome = orch.parse_at("hungriest machines today", common::t0()).await;
    assert_eq!(outcome.tier, Tier::Adapt);
    assert_eq!(outcome.raw.kind(), IntentKind::Ranking);
    assert!(outcome.raw.confidence >= 0.6);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_weak_tier2_result_escalates() {
    let model = ScriptedModel::new().reply(r#"{"intent":"factory_overview","confidence":0.7}"#);
    let (orch, model) = orchestrator(model);
    let outcome = orch.parse_at("overall against", common::t0()).await;
    assert_eq!(outcome.tier, Tier::Llm);
    assert_eq!(outcome.raw.kind(), IntentKind::FactoryOverview);
    assert_eq!(model.calls(), 1);
    assert_eq!(model.load_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_model_output_with_commentary_is_used() {
    let model = ScriptedModel::new()
        .reply("Sure:\n```json\n{\"intent\":\"power_query\",\"confidence\":0.8,\"machine\":\"Boiler-1\"}\n```");
    let (orch, _) = orchestrator(model);
    let outcome = orch.parse_at("asdkj qwerty zxcvbn", common::t0()).await;
    assert_eq!(outcome.raw.kind(), IntentKind::PowerQuery);
    assert_eq!(outcome.raw.entities.machine.as_deref(), Some("Boiler-1"));
    assert_eq!(outcome.raw.utterance, "asdkj qwerty zxcvbn");
}

#[tokio::test]
async fn test_malformed_output_becomes_unknown() {
    let (orch, _) = orchestrator(ScriptedModel::new().reply("I think it's about power"));
    let outcome = orch.parse_at("asdkj qwerty zxcvbn", common::t0()).await;
    assert_eq!(outcome.tier, Tier::Llm);
    assert!(outcome.raw.is_unknown());
    assert_eq!(outcome.raw.confidence, 0.0);
    assert!(outcome.raw.error_annotation().unwrap().contains("Malformed"));
}

#[tokio::test]
async fn test_model_fault_becomes_unknown() {
    let model = ScriptedModel::new().fail(VoiceError::Inference("connection refused".into()));
    let (orch, _) = orchestrator(model);
    let outcome = orch.parse_at("asdkj qwerty zxcvbn", common::t0()).await;
    assert!(outcome.raw.is_unknown());
    assert!(outcome.raw.error_annotation().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_non_model_fault_also_ends_as_unknown() {
    let model = ScriptedModel::new().fail(VoiceError::Internal("backend gone".into()));
    let (orch, _) = orchestrator(model);
    let outcome = orch.parse_at("asdkj qwerty zxcvbn", common::t0()).await;
    assert!(outcome.raw.is_unknown());
    assert!(outcome.raw.error_annotation().unwrap().contains("backend gone"));
}

#[tokio::test]
async fn test_slow_inference_times_out() {
    let mut config = common::test_config();
    config.llm.timeout_secs = 1;
    let model = ScriptedModel::new()
        .with_delay(Duration::from_secs(3))
        .reply(r#"{"intent":"help","confidence":1.0}"#);
    let (orch, _) = orchestrator_with(&config, model);

    let outcome = orch.parse_at("asdkj qwerty zxcvbn", common::t0()).await;
    assert!(outcome.raw.is_unknown());
    assert_eq!(
        outcome.raw.error_annotation(),
        Some("Inference timed out after 1s")
    );
}

#[tokio::test]
async fn test_inference_is_serialized() {
    let model = ScriptedModel::new().with_delay(Duration::from_millis(100));
    let (orch, model) = orchestrator(model);
    let orch = Arc::new(orch);

    let a = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.parse("asdkj qwerty").await }
    });
    let b = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.parse("zxcvbn lorem").await }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(model.calls(), 2);
    assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(model.load_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_time_range_is_rederived_centrally() {
    let (orch, _) = orchestrator(ScriptedModel::new());
    let outcome = orch.parse_at("energy of Boiler-1 yesterday", common::t0()).await;
    assert_eq!(outcome.raw.entities.time_range.unwrap().relative, "yesterday");

    let outcome = orch.parse_at("top 3", common::t0()).await;
    assert!(outcome.raw.entities.time_range.is_none());
}

#[tokio::test]
async fn test_whitelist_update_reaches_every_tier() {
    let (orch, _) = orchestrator(ScriptedModel::new());
    orch.update_whitelist(Arc::new(MachineWhitelist::new(["Chiller-7"])));

    let outcome = orch.parse_at("power of chiller 7", common::t0()).await;
    assert_eq!(outcome.raw.entities.machine.as_deref(), Some("Chiller-7"));
    // Tier 1 has no rule for "draw", Tier 2 does
    let tagged = orch.parse_at("chiller-7 draw", common::t0()).await;
    assert_eq!(tagged.tier, Tier::Adapt);
    assert_eq!(tagged.raw.entities.machine.as_deref(), Some("Chiller-7"));
}

#[tokio::test]
async fn test_routing_is_counted() {
    let config = common::test_config();
    let metrics = VoiceMetrics::new().unwrap();
    let orch = TierOrchestrator::new(
        &config,
        MachineWhitelist::new(common::plant_machines()),
        Arc::new(ScriptedModel::new()),
        metrics.clone(),
    );
    orch.parse_at("top 3", common::t0()).await;
    orch.parse_at("asdkj qwerty zxcvbn", common::t0()).await;

    let text = metrics.gather_text();
    assert!(text.contains("enms_tier_routed_total{tier=\"heuristic\"} 1"));
    assert!(text.contains("enms_tier_routed_total{tier=\"llm\"} 1"));
}
