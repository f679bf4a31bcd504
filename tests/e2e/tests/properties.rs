//! Universal invariants and round-trip laws

use chrono::Utc;
use vesper_core::{
    cosine_similarity, reciprocal_rank_fusion, Embedding, EntityType, MemoryType, SkillSpec,
    RRF_K,
};

use vesper_e2e_tests::fixtures::{TestEngine, DIMS};

// ----------------------------------------------------------------------
// Graph invariants
// ----------------------------------------------------------------------

#[test]
fn confidence_and_strength_stay_in_unit_range() {
    let engine = TestEngine::new();
    let a = engine
        .graph
        .upsert_entity("default", "A", EntityType::Concept, None, Some(5.0))
        .unwrap();
    // Out-of-range inputs are clamped on the way in
    assert!(a.confidence <= 1.0);

    let b = engine
        .graph
        .upsert_entity("default", "B", EntityType::Concept, None, None)
        .unwrap();
    for _ in 0..5 {
        let rel = engine
            .graph
            .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
            .unwrap();
        assert!(rel.strength >= 0.0 && rel.strength <= 1.0);
    }

    let fact = engine
        .graph
        .add_fact("default", &a.id, "p", "v", 7.0, Utc::now(), None)
        .unwrap();
    assert!(fact.confidence <= 1.0);
}

#[test]
fn repeated_entity_upsert_bumps_access_once_each() {
    let engine = TestEngine::new();
    let first = engine
        .graph
        .upsert_entity("default", "Widget", EntityType::Concept, None, None)
        .unwrap();
    let second = engine
        .graph
        .upsert_entity("default", "Widget", EntityType::Concept, None, None)
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.access_count, first.access_count + 1);
    assert_eq!(engine.graph.counts("default").unwrap().entities, 1);
}

#[test]
fn relationship_reinforcement_is_monotonic_and_stamped() {
    let engine = TestEngine::new();
    let a = engine
        .graph
        .upsert_entity("default", "A", EntityType::Concept, None, None)
        .unwrap();
    let b = engine
        .graph
        .upsert_entity("default", "B", EntityType::Concept, None, None)
        .unwrap();

    let mut previous = engine
        .graph
        .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
        .unwrap();
    for _ in 0..3 {
        let next = engine
            .graph
            .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
            .unwrap();
        if previous.strength < 1.0 {
            assert!(next.strength > previous.strength);
        } else {
            assert_eq!(next.strength, 1.0);
        }
        assert!(next.last_reinforced >= previous.last_reinforced);
        previous = next;
    }
}

#[test]
fn decay_never_increases_strength() {
    let engine = TestEngine::new();
    let a = engine
        .graph
        .upsert_entity("default", "A", EntityType::Concept, None, None)
        .unwrap();
    let b = engine
        .graph
        .upsert_entity("default", "B", EntityType::Concept, None, None)
        .unwrap();
    let c = engine
        .graph
        .upsert_entity("default", "C", EntityType::Concept, None, None)
        .unwrap();
    engine
        .graph
        .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
        .unwrap();
    engine
        .graph
        .upsert_relationship("default", &b.id, &c.id, "feeds", None, 0.25)
        .unwrap();

    let before: Vec<f64> = strengths(&engine);
    engine.graph.apply_temporal_decay().unwrap();
    let after: Vec<f64> = strengths(&engine);

    for (b, a) in before.iter().zip(after.iter()) {
        assert!(a <= b);
        assert!(*a >= 0.0);
    }
}

fn strengths(engine: &TestEngine) -> Vec<f64> {
    engine
        .db
        .with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT strength FROM relationships ORDER BY id").unwrap();
            let values = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<f64>, _>>()
                .unwrap();
            Ok(values)
        })
        .unwrap()
}

#[test]
fn conflicts_reference_existing_facts_in_order() {
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

    let detector = vesper_core::ConflictDetector::new(engine.db.clone());
    detector.detect_all("default").unwrap();

    for conflict in detector.list_conflicts("default", None).unwrap() {
        assert!(conflict.fact_id_1 < conflict.fact_id_2);
        assert!(engine.graph.get_fact(&conflict.fact_id_1).unwrap().is_some());
        assert!(engine.graph.get_fact(&conflict.fact_id_2).unwrap().is_some());
    }
}

// ----------------------------------------------------------------------
// Fusion and similarity laws
// ----------------------------------------------------------------------

#[test]
fn rrf_is_commutative_over_lists() {
    let a: Vec<(String, f64)> = ["x", "y", "z"]
        .iter()
        .enumerate()
        .map(|(i, s)| (s.to_string(), 1.0 - i as f64 * 0.1))
        .collect();
    let b: Vec<(String, f64)> = ["y", "w"]
        .iter()
        .enumerate()
        .map(|(i, s)| (s.to_string(), 1.0 - i as f64 * 0.1))
        .collect();

    assert_eq!(
        reciprocal_rank_fusion(&[a.clone(), b.clone()], RRF_K),
        reciprocal_rank_fusion(&[b, a], RRF_K)
    );
}

#[test]
fn cosine_similarity_bounds_and_zero_guard() {
    let a = vec![0.3_f32, -0.7, 0.1, 0.9];
    let b = vec![-0.2_f32, 0.4, 0.8, -0.5];
    let sim = cosine_similarity(&a, &b);
    assert!((-1.0..=1.0).contains(&sim));

    let zero = vec![0.0_f32; 4];
    assert_eq!(cosine_similarity(&zero, &a), 0.0);
    assert_eq!(cosine_similarity(&a, &zero), 0.0);
}

// ----------------------------------------------------------------------
// Round-trip laws
// ----------------------------------------------------------------------

#[test]
fn store_then_list_recent_returns_it_first() {
    let engine = TestEngine::new();
    engine.store("earlier note", MemoryType::Episodic, &[], &[]);
    let id = engine.store("the stored item", MemoryType::Episodic, &[], &[]);

    let recent = engine.working.list_recent("default", 1).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].conversation_id, id);
}

#[test]
fn store_then_delete_is_gone_across_tiers() {
    let engine = TestEngine::new();
    let id = engine.store(
        "The user prefers tabs for indentation",
        MemoryType::Semantic,
        &[],
        &[],
    );
    engine.pipeline.run("default").unwrap();

    engine.working.delete("default", &id).unwrap();
    let purged = engine.graph.purge_conversation_facts(&id).unwrap();
    assert!(purged >= 1);

    assert!(engine.working.get("default", &id).unwrap().is_none());
    let pref = engine
        .graph
        .get_entity("default", "prefers tabs")
        .unwrap()
        .expect("entity survives; only its sourced facts cascade");
    assert!(engine.graph.get_active_facts(&pref.id).unwrap().is_empty());
}

#[test]
fn skill_embedding_blob_is_exactly_d_times_four() {
    let engine = TestEngine::new();
    engine
        .skills
        .add_skill_with_embedding("default", &SkillSpec::new("sort list", "sorts a list"))
        .unwrap();

    let skill = engine
        .skills
        .get_skill("default", "skill_sort_list")
        .unwrap()
        .unwrap();
    let vector = skill.embedding.expect("embedding stored");

    let embedding = Embedding::new(vector, DIMS).unwrap();
    let bytes = embedding.to_bytes();
    assert_eq!(bytes.len(), DIMS * 4);

    // Reading and rewriting preserves bytes exactly
    let reread = Embedding::from_bytes(&bytes, DIMS).unwrap();
    assert_eq!(reread.to_bytes(), bytes);
}

#[test]
fn load_full_updates_last_used_visible_to_readers() {
    let engine = TestEngine::new();
    engine
        .skills
        .add_skill("default", &SkillSpec::new("sort list", "sorts a list"))
        .unwrap();

    assert!(
        engine
            .skills
            .get_skill("default", "skill_sort_list")
            .unwrap()
            .unwrap()
            .last_used
            .is_none()
    );

    engine.skills.load_full("default", "skill_sort_list").unwrap();

    let summaries = engine.skills.get_summaries("default", 10, None).unwrap();
    assert_eq!(summaries[0].id, "skill_sort_list");
    let reread = engine
        .skills
        .get_skill("default", "skill_sort_list")
        .unwrap()
        .unwrap();
    assert!(reread.last_used.is_some());
}
