//! Tests for session.rs

mod common;

use chrono::Duration;
use enms_shared::intent::{Intent, IntentKind};
use enmsd::config::SessionConfig;
use enmsd::session::{ConversationSession, ConversationTurn, SessionState, SessionStore};

fn turn(n: usize) -> ConversationTurn {
    let query = format!("q{}", n);
    ConversationTurn::new(
        &query,
        Intent::new(IntentKind::FactoryOverview, 0.95, &query),
        common::t0() + Duration::seconds(n as i64),
    )
}

fn store(timeout_secs: u64, max_history: usize) -> SessionStore {
    SessionStore::new(&SessionConfig {
        timeout_secs,
        max_history,
        ..SessionConfig::default()
    })
}

#[test]
fn test_history_is_bounded_and_drops_oldest() {
    let (n, k) = (3, 4);
    let mut session = ConversationSession::new("s", n, common::t0());
    for i in 0..n + k {
        session.add_turn(turn(i));
    }
    assert_eq!(session.history().len(), n);
    assert_eq!(session.history().front().unwrap().query, format!("q{}", k));
    assert_eq!(session.history().back().unwrap().query, format!("q{}", n + k - 1));
}

#[test]
fn test_expiry_is_relative_to_last_activity() {
    let timeout = Duration::seconds(1800);
    let mut session = ConversationSession::new("s", 10, common::t0());
    session.add_turn(turn(0));
    assert!(!session.is_expired_at(common::t0(), timeout));
    assert!(!session.is_expired_at(common::t0() + timeout, timeout));
    assert!(session.is_expired_at(common::t0() + timeout + Duration::seconds(1), timeout));
}

#[test]
fn test_new_session_is_normal() {
    let session = ConversationSession::new("s", 10, common::t0());
    assert_eq!(session.state(), SessionState::Normal);
    assert!(!session.has_context());
    assert!(session.history().is_empty());
}

#[test]
fn test_expired_session_comes_back_fresh() {
    let store = store(60, 10);
    store.commit("a", common::t0(), |s| s.add_turn(turn(0)));
    assert_eq!(store.get_or_create_session_at("a", common::t0()).history().len(), 1);

    let later = common::t0() + Duration::seconds(61);
    let fresh = store.get_or_create_session_at("a", later);
    assert!(fresh.history().is_empty());
    assert!(!fresh.has_context());
    assert_eq!(fresh.created_at, later);
}

#[test]
fn test_cleanup_removes_only_expired() {
    let store = store(60, 10);
    store.commit("old", common::t0(), |s| s.add_turn(turn(0)));
    store.commit("new", common::t0() + Duration::seconds(50), |s| s.add_turn(turn(1)));
    assert_eq!(store.len(), 2);

    let removed = store.cleanup_expired_at(common::t0() + Duration::seconds(90));
    assert_eq!(removed, 1);
    assert!(store.get("old").is_none());
    assert!(store.get("new").is_some());
}

#[test]
fn test_sessions_are_independent() {
    let store = store(1800, 10);
    let mut intent = Intent::new(IntentKind::PowerQuery, 0.95, "power of Boiler-1");
    intent.machine = Some("Boiler-1".into());
    store.commit("a", common::t0(), |s| {
        s.add_turn(ConversationTurn::new("power of Boiler-1", intent, common::t0()))
    });

    let b = store.get_or_create_session_at("b", common::t0());
    assert_eq!(b.last_machine, None);
    assert_eq!(
        store.get("a").unwrap().last_machine.as_deref(),
        Some("Boiler-1")
    );
}

#[test]
fn test_concurrent_commits_on_one_id_are_not_lost() {
    let store = store(1800, 100);
    std::thread::scope(|scope| {
        for i in 0..8 {
            let store = &store;
            scope.spawn(move || {
                for j in 0..10 {
                    store.commit("shared", common::t0(), |s| s.add_turn(turn(i * 10 + j)));
                }
            });
        }
    });
    assert_eq!(store.get("shared").unwrap().history().len(), 80);
}

#[test]
fn test_snapshot_is_detached() {
    let store = store(1800, 10);
    let snapshot = store.get_or_create_session_at("a", common::t0());
    store.commit("a", common::t0(), |s| s.add_turn(turn(0)));
    assert!(snapshot.history().is_empty());
    assert_eq!(store.get("a").unwrap().history().len(), 1);
}
