//! Conversation sessions.
//!
//! One session per opaque session id, held in a process-wide
//! [`SessionStore`]. A turn reads a snapshot of its session and writes its
//! changes back in one [`SessionStore::commit`] once the turn has
//! finished, so concurrent turns on the same id never interleave inside a
//! session and different ids never contend.

use crate::config::SessionConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use enms_shared::clarify::{ClarificationKind, ClarificationRequest};
use enms_shared::intent::{Intent, IntentKind};
use enms_shared::time_range::TimeRange;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Implicit session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Normal,
    AwaitingClarification,
}

/// What to restore once the user answers a clarification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingClarification {
    pub kind: ClarificationKind,
    pub intent_kind: IntentKind,
    pub metric: Option<String>,
    pub time_range: Option<TimeRange>,
    /// Candidates, in the order they were offered
    pub options: Vec<String>,
    /// Machines that already resolved: the comparison members so far, or
    /// the subject of a time question
    pub resolved_machines: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingClarification {
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.created_at > timeout
    }

    /// The question again, for a reply that did not resolve it
    pub fn request(&self) -> ClarificationRequest {
        match self.kind {
            ClarificationKind::MachineAmbiguous => {
                ClarificationRequest::machine_ambiguous(self.options.clone())
            }
            ClarificationKind::MachineMissing => ClarificationRequest::machine_missing(self.intent_kind),
            ClarificationKind::MachinesMissing => ClarificationRequest::machines_missing(),
            ClarificationKind::IntentUnknown => ClarificationRequest::intent_unknown(),
            ClarificationKind::TimeAmbiguous => ClarificationRequest::time_ambiguous(),
        }
    }
}

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub intent: Intent,
    #[serde(default)]
    pub response: Option<String>,
    /// Backend data the response was built from
    #[serde(default)]
    pub data: Option<Value>,
}

impl ConversationTurn {
    pub fn new(query: &str, intent: Intent, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            query: query.to_string(),
            intent,
            response: None,
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    history: VecDeque<ConversationTurn>,
    max_history: usize,
    pub last_machine: Option<String>,
    pub last_machines: Option<Vec<String>>,
    pub last_metric: Option<String>,
    pub last_intent_kind: Option<IntentKind>,
    pub last_time_range: Option<String>,
    pub pending_clarification: Option<PendingClarification>,
}

impl ConversationSession {
    pub fn new(session_id: &str, max_history: usize, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at: now,
            last_activity: now,
            history: VecDeque::with_capacity(max_history),
            max_history: max_history.max(1),
            last_machine: None,
            last_machines: None,
            last_metric: None,
            last_intent_kind: None,
            last_time_range: None,
            pending_clarification: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.pending_clarification.is_some() {
            SessionState::AwaitingClarification
        } else {
            SessionState::Normal
        }
    }

    pub fn history(&self) -> &VecDeque<ConversationTurn> {
        &self.history
    }

    pub fn latest_turn_mut(&mut self) -> Option<&mut ConversationTurn> {
        self.history.back_mut()
    }

    /// Whether anything is carried over for follow-ups
    pub fn has_context(&self) -> bool {
        self.last_machine.is_some() || self.last_machines.is_some() || self.last_intent_kind.is_some()
    }

    /// Record a turn. The oldest turn is dropped past capacity.
    pub fn add_turn(&mut self, turn: ConversationTurn) {
        let intent = &turn.intent;
        if intent.machine.is_some() {
            self.last_machine = intent.machine.clone();
            self.last_machines = None;
        } else if intent.machines.is_some() {
            self.last_machines = intent.machines.clone();
            self.last_machine = None;
        }
        if intent.metric.is_some() {
            self.last_metric = intent.metric.clone();
        }
        if let Some(range) = &intent.time_range {
            self.last_time_range = Some(range.relative.clone());
        }
        self.last_intent_kind = Some(intent.kind);
        self.last_activity = self.last_activity.max(turn.timestamp);

        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(turn);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = self.last_activity.max(now);
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.is_expired_at(Utc::now(), timeout)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity > timeout
    }
}

/// Config seconds as a chrono duration, saturating
pub fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
}

/// Process-wide session map
pub struct SessionStore {
    sessions: DashMap<String, ConversationSession>,
    timeout: Duration,
    max_history: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout: seconds(config.timeout_secs),
            max_history: config.max_history,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_or_create_session(&self, session_id: &str) -> ConversationSession {
        self.get_or_create_session_at(session_id, Utc::now())
    }

    /// Snapshot of the session. An expired session counts as absent and
    /// is replaced by a fresh one.
    pub fn get_or_create_session_at(&self, session_id: &str, now: DateTime<Utc>) -> ConversationSession {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session {}", session_id);
                ConversationSession::new(session_id, self.max_history, now)
            });
        if entry.is_expired_at(now, self.timeout) {
            info!("Session {} expired, starting fresh", session_id);
            *entry = ConversationSession::new(session_id, self.max_history, now);
        }
        entry.value().clone()
    }

    /// Snapshot of a live session, without creating one
    pub fn get(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Apply a finished turn's changes to the live session
    pub fn commit<F>(&self, session_id: &str, now: DateTime<Utc>, apply: F)
    where
        F: FnOnce(&mut ConversationSession),
    {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationSession::new(session_id, self.max_history, now));
        apply(entry.value_mut());
        entry.touch(now);
    }

    /// Fill in the response of the session's latest turn
    pub fn attach_response(&self, session_id: &str, response: &str, data: Option<Value>) -> bool {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        match session.latest_turn_mut() {
            Some(turn) => {
                turn.response = Some(response.to_string());
                turn.data = data;
                true
            }
            None => false,
        }
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    /// Drop every expired session, returning how many went
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now, self.timeout));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!("Removed {} expired session(s)", removed);
        }
        removed
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
