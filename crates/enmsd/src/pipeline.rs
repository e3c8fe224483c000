//! The voice pipeline.
//!
//! Wires the orchestrator, validator and session store into one call per
//! utterance, plus the callables a host schedules (whitelist refresh,
//! session cleanup, model prewarm).
//!
//! A turn works on a snapshot of its session and writes back once at the
//! end, so nothing is locked while Tier 3 is thinking.

use crate::config::Config;
use crate::context::{
    apply_smart_defaults, needs_clarification, parse_clarification_response,
    resolve_context_references,
};
use crate::generative::IntentModel;
use crate::metrics::VoiceMetrics;
use crate::orchestrator::TierOrchestrator;
use crate::roster::RosterSupplier;
use crate::session::{seconds, ConversationSession, ConversationTurn, PendingClarification, SessionStore};
use crate::temporal::resolve_time_range;
use crate::validator::Validator;
use chrono::{DateTime, Duration, Utc};
use enms_shared::clarify::{ClarificationKind, ClarificationRequest, ClarifyOutcome};
use enms_shared::error::{VoiceError, VoiceResult};
use enms_shared::intent::{Intent, IntentKind, RawIntent};
use enms_shared::validation::ValidationResult;
use enms_shared::whitelist::{MachineWhitelist, WhitelistHandle};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What one utterance turned into
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Fully resolved, ready for the executor
    Ready(Intent),
    /// Ask the user this before going on
    Clarification(ClarificationRequest),
    /// Not actionable. `message` is what to tell the user.
    Rejected {
        errors: Vec<String>,
        suggestions: Vec<String>,
        message: String,
    },
    /// The user backed out of a pending question
    Cancelled,
}

impl TurnOutcome {
    fn rejected(result: &ValidationResult) -> Self {
        Self::Rejected {
            errors: result.errors.clone(),
            suggestions: result.suggestions.clone(),
            message: result.user_message(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

pub struct Pipeline {
    orchestrator: TierOrchestrator,
    validator: Validator,
    sessions: SessionStore,
    whitelist: WhitelistHandle,
    metrics: VoiceMetrics,
    clarification_timeout: Duration,
    prewarm: bool,
}

impl Pipeline {
    pub fn new(config: &Config, model: Arc<dyn IntentModel>) -> VoiceResult<Self> {
        let metrics = VoiceMetrics::new().map_err(|e| VoiceError::Internal(format!("metrics: {}", e)))?;
        let whitelist = MachineWhitelist::new(config.roster.seed_machines.iter());
        info!("Pipeline starting with {} seed machine(s)", whitelist.len());

        Ok(Self {
            orchestrator: TierOrchestrator::new(config, whitelist.clone(), model, metrics.clone()),
            validator: Validator::new(whitelist.clone(), config.validator.clone()),
            sessions: SessionStore::new(&config.session),
            whitelist: WhitelistHandle::new(whitelist),
            metrics,
            clarification_timeout: seconds(config.session.clarification_timeout_secs),
            prewarm: config.llm.prewarm,
        })
    }

    pub async fn handle(&self, session_id: &str, utterance: &str) -> TurnOutcome {
        self.handle_at(session_id, utterance, Utc::now()).await
    }

    /// Run one utterance through the pipeline with an explicit clock
    pub async fn handle_at(&self, session_id: &str, utterance: &str, now: DateTime<Utc>) -> TurnOutcome {
        let session = self.sessions.get_or_create_session_at(session_id, now);
        self.metrics.set_sessions_active(self.sessions.len());

        if let Some(pending) = &session.pending_clarification {
            if pending.is_stale(now, self.clarification_timeout) {
                info!("Dropping stale {} clarification for {}", pending.kind, session_id);
                let created_at = pending.created_at;
                self.sessions.commit(session_id, now, |s| {
                    if s.pending_clarification.as_ref().is_some_and(|p| p.created_at == created_at) {
                        s.pending_clarification = None;
                    }
                });
            } else {
                return self.resume(session_id, utterance, pending, now);
            }
        }

        let parsed = self.orchestrator.parse_at(utterance, now).await;
        let whitelist = self.whitelist.snapshot();
        let mut result = self.validator.validate(&parsed.raw);

        if let Some(filled) = resolve_context_references(&parsed.raw, &session, &whitelist) {
            let revalidated = self.validator.validate(&filled);
            if revalidated.valid || !result.valid {
                debug!("Using context-resolved intent for '{}'", utterance);
                result = revalidated;
            }
        }

        if let Some(reason) = result.rejection {
            self.metrics.record_rejection(reason);
        }

        if let Some(request) = needs_clarification(&result) {
            return self.ask(session_id, &parsed.raw, &result, request, now);
        }

        match result.intent.clone().filter(|_| result.valid) {
            Some(intent) => self.complete(session_id, utterance, intent, now),
            None => {
                self.sessions.commit(session_id, now, |_| {});
                TurnOutcome::rejected(&result)
            }
        }
    }

    /// Record a clarification question, arming the session to read the
    /// next utterance as its answer where an answer can resolve it
    fn ask(
        &self,
        session_id: &str,
        raw: &RawIntent,
        result: &ValidationResult,
        request: ClarificationRequest,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        self.metrics.record_clarification(request.kind);
        info!("Asking {} in {}: {}", request.kind, session_id, request.prompt);

        // Nothing in a reply can stand in for an intent the parser missed
        if request.kind == ClarificationKind::IntentUnknown {
            self.sessions.commit(session_id, now, |_| {});
            return TurnOutcome::Clarification(request);
        }

        let intent = result.intent.as_ref();
        let resolved_machines = if result.resolved_machines.is_empty() {
            intent
                .map(|i| i.machine.iter().chain(i.machines.iter().flatten()).cloned().collect())
                .unwrap_or_default()
        } else {
            result.resolved_machines.clone()
        };
        let pending = PendingClarification {
            kind: request.kind,
            intent_kind: result.kind,
            metric: intent
                .and_then(|i| i.metric.clone())
                .or_else(|| raw.entities.metric.clone()),
            time_range: intent
                .and_then(|i| i.time_range.clone())
                .or_else(|| raw.entities.time_range.clone()),
            options: request.options.clone(),
            resolved_machines,
            created_at: now,
        };
        self.sessions.commit(session_id, now, |s| s.pending_clarification = Some(pending));
        TurnOutcome::Clarification(request)
    }

    /// Read an utterance as the answer to the session's pending question
    fn resume(
        &self,
        session_id: &str,
        reply: &str,
        pending: &PendingClarification,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        let whitelist = self.whitelist.snapshot();
        let outcome = parse_clarification_response(reply, pending, &whitelist);

        if outcome == ClarifyOutcome::Cancelled {
            info!("Clarification cancelled in {}", session_id);
            self.sessions.commit(session_id, now, |s| s.pending_clarification = None);
            return TurnOutcome::Cancelled;
        }

        let mut raw = RawIntent::new(pending.intent_kind, 1.0, reply);
        raw.entities.metric = pending.metric.clone();
        raw.entities.time_range = pending.time_range.clone();
        raw.from_context = true;

        let resolved = match pending.kind {
            ClarificationKind::MachinesMissing => {
                let mut machines = pending.resolved_machines.clone();
                for name in whitelist.extract_all(reply) {
                    push_unique(&mut machines, name);
                }
                let enough = machines.len() >= 2;
                raw.entities.machines = Some(machines);
                enough
            }
            ClarificationKind::TimeAmbiguous => {
                match resolve_time_range(reply, now).filter(|range| !range.is_ambiguous()) {
                    Some(range) => {
                        raw.entities.time_range = Some(range);
                        match pending.resolved_machines.as_slice() {
                            [] => {}
                            [one] => raw.entities.machine = Some(one.clone()),
                            many => raw.entities.machines = Some(many.to_vec()),
                        }
                        true
                    }
                    None => false,
                }
            }
            _ => match outcome {
                // A comparison keeps the members that already resolved
                ClarifyOutcome::Resolved { machine } if pending.intent_kind == IntentKind::Comparison => {
                    let mut machines = pending.resolved_machines.clone();
                    push_unique(&mut machines, machine);
                    raw.entities.machines = Some(machines);
                    true
                }
                ClarifyOutcome::Resolved { machine } => {
                    raw.entities.machine = Some(machine);
                    true
                }
                _ => false,
            },
        };

        if !resolved {
            debug!("Reply '{}' did not answer the pending {}", reply, pending.kind);
            self.sessions.commit(session_id, now, |_| {});
            return TurnOutcome::Clarification(pending.request());
        }

        // The answer can leave the next question open (a comparison still one machine short)
        let result = self.validator.validate(&raw);
        if let Some(request) = needs_clarification(&result) {
            return self.ask(session_id, &raw, &result, request, now);
        }
        match result.intent.clone().filter(|_| result.valid) {
            Some(intent) => self.complete(session_id, reply, intent, now),
            None => {
                warn!("Clarified intent for {} no longer validates", session_id);
                if let Some(reason) = result.rejection {
                    self.metrics.record_rejection(reason);
                }
                self.sessions.commit(session_id, now, |s| s.pending_clarification = None);
                TurnOutcome::rejected(&result)
            }
        }
    }

    fn complete(&self, session_id: &str, utterance: &str, intent: Intent, now: DateTime<Utc>) -> TurnOutcome {
        let intent = apply_smart_defaults(intent, now);
        let turn = ConversationTurn::new(utterance, intent.clone(), now);
        self.sessions.commit(session_id, now, |s| {
            s.pending_clarification = None;
            s.add_turn(turn);
        });
        TurnOutcome::Ready(intent)
    }

    /// Record the executor's answer against the session's latest turn
    pub fn attach_response(&self, session_id: &str, response: &str, data: Option<Value>) -> bool {
        self.sessions.attach_response(session_id, response, data)
    }

    /// Swap in a new machine list everywhere it is read
    pub fn update_whitelist<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let whitelist = Arc::new(MachineWhitelist::new(names));
        let count = whitelist.len();
        self.orchestrator.update_whitelist(Arc::clone(&whitelist));
        self.validator.update_whitelist(Arc::clone(&whitelist));
        self.whitelist.store(whitelist);
        info!("Whitelist updated: {} machine(s)", count);
        count
    }

    /// Pull the roster and swap it in. On failure or an empty roster the
    /// last good whitelist stays. Returns whether a swap happened.
    pub async fn refresh_whitelist(&self, supplier: &dyn RosterSupplier) -> bool {
        match supplier.fetch_machine_names().await {
            Ok(names) if names.is_empty() => {
                warn!(
                    "Roster came back empty, keeping {} known machine(s)",
                    self.whitelist.snapshot().len()
                );
                self.metrics.record_refresh("empty");
                false
            }
            Ok(names) => {
                self.update_whitelist(names);
                self.metrics.record_refresh("ok");
                true
            }
            Err(e) => {
                warn!(
                    "Whitelist refresh failed, serving stale list of {}: {}",
                    self.whitelist.snapshot().len(),
                    e
                );
                self.metrics.record_refresh("error");
                false
            }
        }
    }

    pub fn cleanup_sessions(&self) -> usize {
        self.cleanup_sessions_at(Utc::now())
    }

    pub fn cleanup_sessions_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.sessions.cleanup_expired_at(now);
        self.metrics.set_sessions_active(self.sessions.len());
        removed
    }

    /// Start loading the Tier 3 model in the background, if configured
    pub fn prewarm(&self) -> Option<JoinHandle<()>> {
        self.prewarm.then(|| self.orchestrator.generative().prewarm())
    }

    pub fn model_loaded(&self) -> bool {
        self.orchestrator.generative().is_loaded()
    }

    pub fn metrics(&self) -> &VoiceMetrics {
        &self.metrics
    }

    pub fn whitelist(&self) -> Arc<MachineWhitelist> {
        self.whitelist.snapshot()
    }

    /// Current state of a session, without creating it
    pub fn session(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.get(session_id)
    }
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}
