//! Tests for whitelist.rs

use enms_shared::whitelist::{
    ExtractedMachine, MachineMatch, MachineWhitelist, WhitelistHandle, DEFAULT_FUZZY_THRESHOLD,
};
use std::sync::Arc;

fn plant() -> MachineWhitelist {
    MachineWhitelist::new([
        "Compressor-1",
        "Compressor-EU-1",
        "Boiler-1",
        "HVAC-Main",
        "HVAC-EU-North",
        "Injection-Molding-1",
    ])
}

#[test]
fn test_exact_lookup_is_case_insensitive_and_canonical() {
    let wl = plant();
    assert_eq!(
        wl.lookup("boiler-1", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Exact("Boiler-1".to_string())
    );
    assert_eq!(
        wl.lookup("COMPRESSOR-EU-1", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Exact("Compressor-EU-1".to_string())
    );
}

#[test]
fn test_normalized_lookup_ignores_separators_and_number_words() {
    let wl = plant();
    assert_eq!(
        wl.lookup("compressor one", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Normalized("Compressor-1".to_string())
    );
    assert_eq!(
        wl.lookup("boiler 1", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Normalized("Boiler-1".to_string())
    );
    assert_eq!(
        wl.lookup("injection molding", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Normalized("Injection-Molding-1".to_string())
    );
}

#[test]
fn test_type_token_matching_several_is_ambiguous() {
    let wl = plant();
    assert_eq!(
        wl.lookup("compressor", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Ambiguous(vec!["Compressor-1".to_string(), "Compressor-EU-1".to_string()])
    );
    assert_eq!(
        wl.lookup("hvacs", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Ambiguous(vec!["HVAC-Main".to_string(), "HVAC-EU-North".to_string()])
    );
}

#[test]
fn test_unique_type_token_resolves() {
    let wl = plant();
    assert_eq!(
        wl.lookup("boiler", DEFAULT_FUZZY_THRESHOLD),
        MachineMatch::Normalized("Boiler-1".to_string())
    );
}

#[test]
fn test_fuzzy_suggestion() {
    let wl = plant();
    match wl.lookup("Boiler-l", DEFAULT_FUZZY_THRESHOLD) {
        MachineMatch::Fuzzy { suggestion, score } => {
            assert_eq!(suggestion, "Boiler-1");
            assert!(score >= DEFAULT_FUZZY_THRESHOLD);
        }
        other => panic!("expected fuzzy match, got {:?}", other),
    }
}

#[test]
fn test_unrelated_token_not_found() {
    let wl = plant();
    assert_eq!(wl.lookup("toaster", DEFAULT_FUZZY_THRESHOLD), MachineMatch::NotFound);
    assert_eq!(wl.lookup("", DEFAULT_FUZZY_THRESHOLD), MachineMatch::NotFound);
}

#[test]
fn test_extract_full_name_wins() {
    let wl = plant();
    assert_eq!(
        wl.extract_from_text("what's the power of compressor eu 1 today"),
        Some(ExtractedMachine::Canonical("Compressor-EU-1".to_string()))
    );
    assert_eq!(
        wl.extract_from_text("Compressor-1 power"),
        Some(ExtractedMachine::Canonical("Compressor-1".to_string()))
    );
}

#[test]
fn test_extract_bare_type_returns_token() {
    let wl = plant();
    assert_eq!(
        wl.extract_from_text("compressor power"),
        Some(ExtractedMachine::TypeToken("compressor".to_string()))
    );
}

#[test]
fn test_extract_partial_name_narrowing_to_one() {
    let wl = plant();
    assert_eq!(
        wl.extract_from_text("how is the hvac main doing"),
        Some(ExtractedMachine::Canonical("HVAC-Main".to_string()))
    );
    assert_eq!(
        wl.extract_from_text("status of the boiler"),
        Some(ExtractedMachine::Canonical("Boiler-1".to_string()))
    );
}

#[test]
fn test_extract_nothing() {
    let wl = plant();
    assert_eq!(wl.extract_from_text("top 3"), None);
}

#[test]
fn test_extract_all_in_order() {
    let wl = plant();
    assert_eq!(
        wl.extract_all("compare boiler 1 and compressor-1 and Boiler-1"),
        vec!["Boiler-1".to_string(), "Compressor-1".to_string()]
    );
}

#[test]
fn test_handle_swaps_whole_snapshot() {
    let handle = WhitelistHandle::new(plant());
    let before = handle.snapshot();
    handle.store(Arc::new(MachineWhitelist::new(["Chiller-7"])));
    let after = handle.snapshot();

    // Old readers keep their full snapshot
    assert_eq!(before.len(), 6);
    assert!(before.contains("Boiler-1"));
    assert_eq!(after.names(), vec!["Chiller-7".to_string()]);
}
