//! Boundary behavior of the validation layer, conflict passes, and pruning

use chrono::Utc;
use vesper_core::{
    validate_content, validate_max_results, validate_namespace, validate_query, ConflictDetector,
    ConflictKind, EntityType, VesperError,
};

use vesper_e2e_tests::fixtures::TestEngine;

#[test]
fn content_limit_is_exactly_one_hundred_thousand() {
    assert!(validate_content(&"x".repeat(100_000)).is_ok());
    let over = validate_content(&"x".repeat(100_001));
    assert!(matches!(over, Err(VesperError::Validation { field, .. }) if field == "content"));
}

#[test]
fn max_results_accepts_one_through_one_hundred() {
    assert!(validate_max_results(0).is_err());
    assert!(validate_max_results(1).is_ok());
    assert!(validate_max_results(100).is_ok());
    assert!(validate_max_results(101).is_err());
}

#[test]
fn query_limits() {
    assert!(validate_query("").is_err());
    assert!(validate_query(&"q".repeat(10_000)).is_ok());
    assert!(validate_query(&"q".repeat(10_001)).is_err());
}

#[test]
fn namespace_defaults_and_format() {
    assert_eq!(validate_namespace(None).unwrap(), "default");
    assert!(validate_namespace(Some("team_a")).is_ok());
    assert!(validate_namespace(Some("_team")).is_err());
}

#[test]
fn same_valid_from_open_facts_file_one_contradiction_only() {
    let engine = TestEngine::new();
    let e = engine
        .graph
        .upsert_entity("default", "user", EntityType::Person, None, None)
        .unwrap();
    let valid_from = Utc::now();
    engine
        .graph
        .add_fact("default", &e.id, "editor", "vim", 1.0, valid_from, None)
        .unwrap();
    engine
        .graph
        .add_fact("default", &e.id, "editor", "emacs", 1.0, valid_from, None)
        .unwrap();

    let detector = ConflictDetector::new(engine.db.clone());
    detector.detect_all("default").unwrap();

    let conflicts = detector.list_conflicts("default", None).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::Contradiction);
    assert!(
        !conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::TemporalOverlap)
    );
}

#[test]
fn prune_boundary_at_strength_five_hundredths() {
    let engine = TestEngine::new();
    let a = engine
        .graph
        .upsert_entity("default", "A", EntityType::Concept, None, None)
        .unwrap();
    let b = engine
        .graph
        .upsert_entity("default", "B", EntityType::Concept, None, None)
        .unwrap();
    let rel = engine
        .graph
        .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
        .unwrap();

    let set_strength = |value: f64| {
        engine
            .db
            .with_writer(|conn| {
                conn.execute(
                    "UPDATE relationships SET strength = ?1 WHERE id = ?2",
                    rusqlite::params![value, rel.id],
                )?;
                Ok(())
            })
            .unwrap();
    };

    // At the floor: kept
    set_strength(0.05);
    assert_eq!(engine.graph.prune_relationships().unwrap(), 0);

    // Below the floor with cold endpoints: pruned
    set_strength(0.04);
    assert_eq!(engine.graph.prune_relationships().unwrap(), 1);
}

#[test]
fn prune_spares_edges_with_warm_endpoints() {
    let engine = TestEngine::new();
    let a = engine
        .graph
        .upsert_entity("default", "A", EntityType::Concept, None, None)
        .unwrap();
    let b = engine
        .graph
        .upsert_entity("default", "B", EntityType::Concept, None, None)
        .unwrap();
    engine
        .graph
        .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
        .unwrap();

    engine
        .db
        .with_writer(|conn| {
            conn.execute("UPDATE relationships SET strength = 0.01", [])?;
            conn.execute(
                "UPDATE entities SET access_count = 3 WHERE id = ?1",
                rusqlite::params![a.id],
            )?;
            Ok(())
        })
        .unwrap();

    // One warm endpoint is enough to keep the edge
    assert_eq!(engine.graph.prune_relationships().unwrap(), 0);
}
