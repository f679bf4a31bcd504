//! End-to-end scenarios: ingest, consolidation, routing, skills, limits

use std::sync::Arc;

use chrono::{Duration, Utc};
use vesper_core::{
    quota, EntityType, MemoryCache, MemoryType, Operation, QueryClass, RateLimiter, RateTier,
    SkillSpec,
};

use vesper_e2e_tests::fixtures::{DeadCache, TestEngine};

// ----------------------------------------------------------------------
// Scenario 1: preference recall
// ----------------------------------------------------------------------

#[test]
fn preference_recall_end_to_end() {
    let engine = TestEngine::new();
    engine.store(
        "The user prefers TypeScript over JavaScript for type safety",
        MemoryType::Semantic,
        &["typescript", "javascript"],
        &["languages"],
    );

    let stats = engine.pipeline.run("default").unwrap();
    assert_eq!(stats.memories_processed, 1);
    assert!(stats.entities_extracted >= 3);

    let response = engine
        .router
        .retrieve("default", "What programming language do I prefer?", 5)
        .unwrap();
    assert_eq!(response.query_class, QueryClass::Preference);

    let top = response.results.first().expect("a preference result");
    assert!(top.content.contains("TypeScript"));
    assert!(top.content.contains("type safety"));
}

// ----------------------------------------------------------------------
// Scenario 2: multi-hop project query
// ----------------------------------------------------------------------

#[test]
fn multi_hop_project_query() {
    let engine = TestEngine::new();
    let vesper = engine
        .graph
        .upsert_entity("default", "Vesper", EntityType::Project, None, None)
        .unwrap();
    let mcp = engine
        .graph
        .upsert_entity("default", "MCP", EntityType::Concept, None, None)
        .unwrap();
    let protocol = engine
        .graph
        .upsert_entity(
            "default",
            "Model Context Protocol",
            EntityType::Concept,
            None,
            None,
        )
        .unwrap();

    engine
        .graph
        .upsert_relationship("default", &vesper.id, &mcp.id, "uses", None, 1.0)
        .unwrap();
    engine
        .graph
        .upsert_relationship("default", &mcp.id, &protocol.id, "means", None, 1.0)
        .unwrap();
    let fact = engine
        .graph
        .add_fact(
            "default",
            &protocol.id,
            "definition",
            "open standard for agent tool calling",
            0.95,
            Utc::now(),
            None,
        )
        .unwrap();

    let neighborhood = engine
        .graph
        .personalized_pagerank_with_facts(&vesper.id, 3)
        .unwrap();

    let chain = neighborhood
        .chains
        .iter()
        .find(|c| c.entity_names == ["Vesper", "MCP", "Model Context Protocol"])
        .expect("the three-entity chain");
    assert!(chain.score > 0.0);
    assert!(neighborhood.facts.iter().any(|f| f.id == fact.id));

    // The router reaches the same fact from the query text
    let response = engine
        .router
        .retrieve("default", "What protocol does Vesper follow?", 5)
        .unwrap();
    assert!(
        response
            .results
            .iter()
            .any(|r| r.content.contains("open standard for agent tool calling"))
    );
}

// ----------------------------------------------------------------------
// Scenario 3: decay and prune
// ----------------------------------------------------------------------

#[test]
fn decay_then_prune_removes_stale_relationship() {
    let engine = TestEngine::new();
    let a = engine
        .graph
        .upsert_entity("default", "OldProject", EntityType::Project, None, None)
        .unwrap();
    let b = engine
        .graph
        .upsert_entity("default", "OldTool", EntityType::Concept, None, None)
        .unwrap();
    let rel = engine
        .graph
        .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
        .unwrap();

    // strength 0.1, reinforced 120 days ago, endpoints barely touched
    engine
        .db
        .with_writer(|conn| {
            conn.execute(
                "UPDATE relationships SET strength = 0.1, last_reinforced = ?1 WHERE id = ?2",
                rusqlite::params![(Utc::now() - Duration::days(120)).to_rfc3339(), rel.id],
            )?;
            conn.execute(
                "UPDATE entities SET access_count = 1 WHERE id IN (?1, ?2)",
                rusqlite::params![a.id, b.id],
            )?;
            Ok(())
        })
        .unwrap();

    let stats = engine.pipeline.run("default").unwrap();
    // 0.1 * e^(-120/30) ~ 0.0018 < 0.05, so the prune step removes the edge
    assert_eq!(stats.memories_pruned, 1);

    let counts = engine.graph.counts("default").unwrap();
    assert_eq!(counts.relationships, 0);
    assert_eq!(counts.entities, 2);
}

// ----------------------------------------------------------------------
// Scenario 4: analogical retrieval
// ----------------------------------------------------------------------

#[test]
fn analogy_finds_filter_map() {
    let engine = TestEngine::new();
    for (name, summary) in [
        ("sort list", "sort a list of values"),
        ("sort map", "sort a map of values"),
        ("filter list", "filter a list of values"),
        ("filter map", "filter a map of values"),
        ("render chart", "draw a chart from values"),
    ] {
        engine
            .skills
            .add_skill_with_embedding("default", &SkillSpec::new(name, summary))
            .unwrap();
    }

    for _ in 0..3 {
        engine
            .skills
            .record_co_occurrence("skill_sort_list", "skill_sort_map")
            .unwrap();
    }
    assert_eq!(engine.skills.compute_relational_vectors(3).unwrap(), 1);

    let hits = engine
        .skills
        .analogical_search(
            "default",
            "skill_sort_list",
            "skill_sort_map",
            "skill_filter_list",
            1,
        )
        .unwrap();

    assert_eq!(hits[0].0.id, "skill_filter_map");
    assert!(hits.iter().all(|(s, _)| s.id != "skill_filter_list"));
}

// ----------------------------------------------------------------------
// Scenario 5: rate limiting, hot path and fail-closed
// ----------------------------------------------------------------------

#[test]
fn rate_limit_trips_on_call_past_quota() {
    let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), true);
    let limit = quota(RateTier::Standard, Operation::Store);
    assert_eq!(limit, 100);

    for i in 0..limit {
        let decision = limiter
            .check(RateTier::Standard, "agent-7", Operation::Store)
            .unwrap();
        assert!(decision.allowed, "call {i} should be admitted");
    }

    let denied = limiter
        .check(RateTier::Standard, "agent-7", Operation::Store)
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.status, 429);
    assert!(denied.retry_after_secs.unwrap() >= 1);
}

#[test]
fn rate_limit_fails_closed_when_cache_is_down() {
    let limiter = RateLimiter::new(Arc::new(DeadCache), true);
    let decision = limiter
        .check(RateTier::Standard, "agent-7", Operation::Store)
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.status, 503);
    assert_eq!(decision.retry_after_secs, Some(30));
}

// ----------------------------------------------------------------------
// Scenario 6: working-memory eviction
// ----------------------------------------------------------------------

#[test]
fn eviction_keeps_newest_five() {
    let engine = TestEngine::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(engine.store(
            &format!("conversation number {i}"),
            MemoryType::Episodic,
            &[],
            &[],
        ));
    }

    let recent = engine.working.list_recent("default", 10).unwrap();
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0].conversation_id, ids[5]);
    assert!(
        recent
            .iter()
            .all(|c| c.conversation_id != ids[0])
    );
    assert!(engine.working.get("default", &ids[0]).unwrap().is_none());
}
