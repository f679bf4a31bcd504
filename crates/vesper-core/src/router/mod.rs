//! Smart query router
//!
//! Classifies each query with a strictly-ordered pattern ladder (first match
//! wins) and dispatches it to the cheapest tier that can answer:
//!
//! - working memory fast path when a recent conversation scores above 0.85
//! - factual / project queries walk the semantic graph from a mentioned
//!   entity (fact-collecting PageRank, depth 3)
//! - preference queries read the preference index
//! - temporal queries run a time-range scan
//! - skill queries use hybrid skill search
//! - everything else fuses the graph and skill channels with RRF
//!
//! Dispatch errors are contained per branch: a failing backing store turns
//! that branch into an empty result, never into a caller-visible error.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::WorkingMemory;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::model::Fact;
use crate::search::{reciprocal_rank_fusion, RRF_K};
use crate::skills::SkillLibrary;

/// Working-memory similarity above which the router returns immediately
const FAST_PATH_SIMILARITY: f64 = 0.85;

/// Traversal depth for entity-anchored queries
const GRAPH_DEPTH: usize = 3;

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Query classes, cheapest-tier first in dispatch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryClass {
    Skill,
    Temporal,
    Factual,
    Preference,
    Project,
    Complex,
}

impl QueryClass {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Skill => "skill",
            QueryClass::Temporal => "temporal",
            QueryClass::Factual => "factual",
            QueryClass::Preference => "preference",
            QueryClass::Project => "project",
            QueryClass::Complex => "complex",
        }
    }
}

/// Classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Winning class
    pub class: QueryClass,
    /// Ladder confidence for the matched rung
    pub confidence: f64,
}

/// The ordered pattern ladder; first match wins
pub struct QueryClassifier {
    ladder: Vec<(Regex, QueryClass, f64)>,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClassifier {
    /// Compile the ladder. Order is specific -> general; "like before" must
    /// hit the skill rung before the bare "before" temporal rung.
    pub fn new() -> Self {
        let rungs: [(&str, QueryClass, f64); 10] = [
            (
                r"like before|same as|same way|how you",
                QueryClass::Skill,
                0.85,
            ),
            (r"\banalyze\b", QueryClass::Skill, 0.75),
            (
                r"last (week|month|year|time)",
                QueryClass::Temporal,
                0.95,
            ),
            (
                r"\byesterday\b|\brecently\b|\bearlier\b",
                QueryClass::Temporal,
                0.90,
            ),
            (r"\bbefore\b", QueryClass::Temporal, 0.70),
            (
                r"\b(what|who|where)\s+(is|was|are|were)\b",
                QueryClass::Factual,
                0.95,
            ),
            (
                r"\bprefer|\bwant\b|\bstyle\b|\bfavorite\b",
                QueryClass::Preference,
                0.90,
            ),
            (r"how do i like", QueryClass::Preference, 0.85),
            (
                r"working on|\bdecided\b|\bdecide\b|\bdecision\b",
                QueryClass::Project,
                0.90,
            ),
            (
                r"\bproject\b|\bbuilding\b|\bcreating\b|\bdeveloping\b",
                QueryClass::Project,
                0.85,
            ),
        ];
        Self {
            ladder: rungs
                .iter()
                .filter_map(|(pattern, class, confidence)| {
                    Regex::new(pattern).ok().map(|re| (re, *class, *confidence))
                })
                .collect(),
        }
    }

    /// Classify a query over its lowercased, trimmed form
    pub fn classify(&self, query: &str) -> Classification {
        let q = query.trim().to_lowercase();
        for (pattern, class, confidence) in &self.ladder {
            if pattern.is_match(&q) {
                return Classification {
                    class: *class,
                    confidence: *confidence,
                };
            }
        }
        Classification {
            class: QueryClass::Complex,
            confidence: 0.50,
        }
    }
}

// ============================================================================
// ROUTING
// ============================================================================

/// One routed result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedResult {
    /// Result text
    pub content: String,
    /// Similarity or relevance score for the winning channel
    pub similarity_score: f64,
    /// Which tier produced the result
    pub source: String,
}

/// Routed response with the classification that drove dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedResponse {
    /// Results, best first, truncated to the requested count
    pub results: Vec<RoutedResult>,
    /// Winning query class
    pub query_class: QueryClass,
    /// Ladder confidence
    pub confidence: f64,
}

/// The smart router (C7)
pub struct QueryRouter {
    working: Arc<WorkingMemory>,
    graph: Arc<GraphStore>,
    skills: Arc<SkillLibrary>,
    classifier: QueryClassifier,
}

impl QueryRouter {
    /// Wire the router over the three tiers
    pub fn new(
        working: Arc<WorkingMemory>,
        graph: Arc<GraphStore>,
        skills: Arc<SkillLibrary>,
    ) -> Self {
        Self {
            working,
            graph,
            skills,
            classifier: QueryClassifier::new(),
        }
    }

    /// Classify without dispatching
    pub fn classify(&self, query: &str) -> Classification {
        self.classifier.classify(query)
    }

    /// Route a query to the cheapest tier that can answer it
    pub fn retrieve(
        &self,
        namespace: &str,
        query: &str,
        max_results: usize,
    ) -> Result<RoutedResponse> {
        // Working memory first; a strong recent hit short-circuits dispatch
        let cache_hits = self
            .working
            .search_text(namespace, query, max_results)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Working-memory branch failed");
                vec![]
            });

        if let Some((conv, score)) = cache_hits.first() {
            if *score > FAST_PATH_SIMILARITY {
                return Ok(RoutedResponse {
                    results: vec![RoutedResult {
                        content: conv.full_text.clone(),
                        similarity_score: *score,
                        source: "working_memory".to_string(),
                    }],
                    query_class: QueryClass::Complex,
                    confidence: 1.0,
                });
            }
        }

        let classification = self.classifier.classify(query);
        let mut results = match classification.class {
            QueryClass::Factual | QueryClass::Project => self.route_graph(namespace, query),
            QueryClass::Preference => self.route_preferences(namespace, query),
            QueryClass::Temporal => self.route_temporal(namespace, query),
            QueryClass::Skill => self.route_skills(namespace, query, max_results),
            QueryClass::Complex => self.route_complex(namespace, query, max_results),
        };

        for (conv, score) in cache_hits {
            results.push(RoutedResult {
                content: conv.full_text,
                similarity_score: score,
                source: "working_memory".to_string(),
            });
        }
        results.truncate(max_results);

        Ok(RoutedResponse {
            results,
            query_class: classification.class,
            confidence: classification.confidence,
        })
    }

    /// Entity-anchored dispatch: fact-collecting PageRank from the mentioned
    /// entity, falling back to keyword fact search
    fn route_graph(&self, namespace: &str, query: &str) -> Vec<RoutedResult> {
        let branch = || -> Result<Vec<RoutedResult>> {
            let Some(entity) = self.graph.find_entity_in_text(namespace, query)? else {
                return Ok(self.keyword_fact_results(namespace, query));
            };

            let neighborhood = self
                .graph
                .personalized_pagerank_with_facts(&entity.id, GRAPH_DEPTH)?;

            let mut results: Vec<RoutedResult> = Vec::new();
            for fact in &neighborhood.facts {
                results.push(RoutedResult {
                    content: self.fact_content(namespace, fact),
                    similarity_score: fact.confidence,
                    source: "semantic_graph".to_string(),
                });
            }
            for chain in &neighborhood.chains {
                results.push(RoutedResult {
                    content: chain.entity_names.join(" -> "),
                    similarity_score: chain.score,
                    source: "semantic_graph".to_string(),
                });
            }
            Ok(results)
        };
        self.contained(branch(), "semantic graph")
    }

    fn route_preferences(&self, namespace: &str, query: &str) -> Vec<RoutedResult> {
        let branch = || -> Result<Vec<RoutedResult>> {
            let preferences = self.graph.get_preferences(namespace, None)?;
            let q = query.to_lowercase();
            let mut results: Vec<RoutedResult> = Vec::new();
            for (entity, facts) in preferences {
                // Prefer domain-relevant entries when the query names one
                let relevance = entity
                    .description
                    .as_deref()
                    .map(|d| {
                        d.to_lowercase()
                            .split_whitespace()
                            .filter(|w| q.contains(*w))
                            .count() as f64
                    })
                    .unwrap_or(0.0);
                for fact in facts {
                    results.push(RoutedResult {
                        content: self.fact_content(namespace, &fact),
                        similarity_score: fact.confidence + relevance * 0.01,
                        source: "semantic_graph".to_string(),
                    });
                }
            }
            results.sort_by(|a, b| {
                b.similarity_score
                    .partial_cmp(&a.similarity_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            Ok(results)
        };
        self.contained(branch(), "preference index")
    }

    fn route_temporal(&self, namespace: &str, query: &str) -> Vec<RoutedResult> {
        let branch = || -> Result<Vec<RoutedResult>> {
            let (start, end) = parse_time_range(query, Utc::now());
            let facts = self.graph.get_by_time_range(namespace, start, end)?;
            Ok(facts
                .iter()
                .map(|fact| RoutedResult {
                    content: self.fact_content(namespace, fact),
                    similarity_score: fact.confidence,
                    source: "semantic_graph".to_string(),
                })
                .collect())
        };
        self.contained(branch(), "time-range scan")
    }

    fn route_skills(&self, namespace: &str, query: &str, k: usize) -> Vec<RoutedResult> {
        let branch = || -> Result<Vec<RoutedResult>> {
            let hits = self.skills.hybrid_search(namespace, query, k)?;
            Ok(hits
                .into_iter()
                .map(|(skill, score)| RoutedResult {
                    content: format!("{}: {}", skill.name, skill.summary),
                    similarity_score: score,
                    source: "skill_library".to_string(),
                })
                .collect())
        };
        self.contained(branch(), "skill library")
    }

    /// Complex fusion: keyword facts (sparse), hybrid skills (dense), and an
    /// entity-anchored graph walk, fused with the shared RRF scheme. A BM25
    /// channel slots in as a further list when a backend provides one.
    fn route_complex(&self, namespace: &str, query: &str, k: usize) -> Vec<RoutedResult> {
        let branch = || -> Result<Vec<RoutedResult>> {
            let facts = self
                .graph
                .search_facts_keyword(namespace, query, 2 * k)
                .unwrap_or_default();
            let skills = self
                .skills
                .hybrid_search(namespace, query, 2 * k)
                .unwrap_or_default();
            let walked = self
                .graph
                .find_entity_in_text(namespace, query)
                .ok()
                .flatten()
                .and_then(|entity| {
                    self.graph
                        .personalized_pagerank_with_facts(&entity.id, GRAPH_DEPTH)
                        .ok()
                })
                .map(|neighborhood| neighborhood.facts)
                .unwrap_or_default();

            let mut content_by_key: std::collections::HashMap<String, RoutedResult> =
                std::collections::HashMap::new();
            let walk_list: Vec<(String, f64)> = walked
                .into_iter()
                .map(|fact| {
                    let key = format!("fact:{}", fact.id);
                    let score = fact.confidence;
                    content_by_key.insert(
                        key.clone(),
                        RoutedResult {
                            content: self.fact_content(namespace, &fact),
                            similarity_score: score,
                            source: "semantic_graph".to_string(),
                        },
                    );
                    (key, score)
                })
                .collect();
            let fact_list: Vec<(String, f64)> = facts
                .into_iter()
                .map(|(fact, score)| {
                    let key = format!("fact:{}", fact.id);
                    content_by_key.entry(key.clone()).or_insert_with(|| {
                        RoutedResult {
                            content: self.fact_content(namespace, &fact),
                            similarity_score: score,
                            source: "semantic_graph".to_string(),
                        }
                    });
                    (key, score)
                })
                .collect();
            let skill_list: Vec<(String, f64)> = skills
                .into_iter()
                .map(|(skill, score)| {
                    let key = format!("skill:{}", skill.id);
                    content_by_key.insert(
                        key.clone(),
                        RoutedResult {
                            content: format!("{}: {}", skill.name, skill.summary),
                            similarity_score: score,
                            source: "skill_library".to_string(),
                        },
                    );
                    (key, score)
                })
                .collect();

            let fused = reciprocal_rank_fusion(&[fact_list, skill_list, walk_list], RRF_K);
            Ok(fused
                .into_iter()
                .filter_map(|(key, score)| {
                    content_by_key.remove(&key).map(|mut result| {
                        result.similarity_score = score;
                        result
                    })
                })
                .take(k)
                .collect())
        };
        self.contained(branch(), "complex fusion")
    }

    fn keyword_fact_results(&self, namespace: &str, query: &str) -> Vec<RoutedResult> {
        self.graph
            .search_facts_keyword(namespace, query, 10)
            .unwrap_or_default()
            .into_iter()
            .map(|(fact, score)| RoutedResult {
                content: self.fact_content(namespace, &fact),
                similarity_score: score,
                source: "semantic_graph".to_string(),
            })
            .collect()
    }

    /// Render a fact for the caller. When the source conversation is still
    /// in working memory its verbatim text wins; otherwise the fact's
    /// entity/property/value triple is rendered.
    fn fact_content(&self, namespace: &str, fact: &Fact) -> String {
        if let Some(conversation_id) = &fact.source_conversation {
            if let Ok(Some(conv)) = self.working.get(namespace, conversation_id) {
                return conv.full_text;
            }
        }
        let entity_name = self
            .graph
            .get_entity_by_id(&fact.entity_id)
            .ok()
            .flatten()
            .map(|e| e.name)
            .unwrap_or_else(|| fact.entity_id.clone());
        format!("{entity_name} {}: {}", fact.property, fact.value)
    }

    /// Per-branch containment: errors degrade to an empty result
    fn contained(
        &self,
        outcome: Result<Vec<RoutedResult>>,
        branch: &str,
    ) -> Vec<RoutedResult> {
        match outcome {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(branch, error = %e, "Dispatch branch failed; returning empty");
                vec![]
            }
        }
    }
}

/// Shallow time-range parsing from temporal keywords
fn parse_time_range(
    query: &str,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let q = query.to_lowercase();
    if q.contains("last week") {
        (Some(now - Duration::days(7)), Some(now))
    } else if q.contains("last month") {
        (Some(now - Duration::days(30)), Some(now))
    } else if q.contains("last year") {
        (Some(now - Duration::days(365)), Some(now))
    } else if q.contains("yesterday") {
        (Some(now - Duration::days(2)), Some(now))
    } else if q.contains("recently") || q.contains("earlier") || q.contains("last time") {
        (Some(now - Duration::days(14)), Some(now))
    } else {
        (None, Some(now))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::VesperConfig;
    use crate::embeddings::{Embedder, HashEmbedder};
    use crate::model::{Conversation, EntityType, MemoryType, SkillSpec};
    use crate::storage::Database;

    fn classifier() -> QueryClassifier {
        QueryClassifier::new()
    }

    #[test]
    fn test_ladder_order_and_confidence() {
        let c = classifier();

        // "like before" hits the skill rung, not the bare "before" rung
        let skill = c.classify("do it like before");
        assert_eq!(skill.class, QueryClass::Skill);
        assert!((skill.confidence - 0.85).abs() < 1e-9);

        let analyze = c.classify("analyze this dataset");
        assert_eq!(analyze.class, QueryClass::Skill);
        assert!((analyze.confidence - 0.75).abs() < 1e-9);

        let temporal = c.classify("what did we do last week");
        assert_eq!(temporal.class, QueryClass::Temporal);
        assert!((temporal.confidence - 0.95).abs() < 1e-9);

        let bare_before = c.classify("the meeting before the launch");
        assert_eq!(bare_before.class, QueryClass::Temporal);
        assert!((bare_before.confidence - 0.70).abs() < 1e-9);

        let factual = c.classify("What is MCP?");
        assert_eq!(factual.class, QueryClass::Factual);
        assert!((factual.confidence - 0.95).abs() < 1e-9);

        let preference = c.classify("which editor do I prefer");
        assert_eq!(preference.class, QueryClass::Preference);
        assert!((preference.confidence - 0.90).abs() < 1e-9);

        let project = c.classify("what are we working on");
        assert_eq!(project.class, QueryClass::Project);
        assert!((project.confidence - 0.90).abs() < 1e-9);

        let complex = c.classify("summarize everything relevant");
        assert_eq!(complex.class, QueryClass::Complex);
        assert!((complex.confidence - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_factual_beats_preference_when_both_match() {
        // "what is" (rung 6) outranks "favorite" (rung 7)
        let c = classifier();
        let result = c.classify("what is my favorite editor");
        assert_eq!(result.class, QueryClass::Factual);
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        router: QueryRouter,
        working: Arc<WorkingMemory>,
        graph: Arc<GraphStore>,
        skills: Arc<SkillLibrary>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_dir(dir.path()).unwrap());
        let working = Arc::new(WorkingMemory::new(
            Arc::new(MemoryCache::new()),
            &VesperConfig::default(),
        ));
        let graph = Arc::new(GraphStore::new(Arc::clone(&db)));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let skills = Arc::new(SkillLibrary::new(db, Some(embedder), 64));
        let router = QueryRouter::new(
            Arc::clone(&working),
            Arc::clone(&graph),
            Arc::clone(&skills),
        );
        Fixture {
            _dir: dir,
            router,
            working,
            graph,
            skills,
        }
    }

    #[test]
    fn test_fast_path_returns_working_memory_hit() {
        let f = fixture();
        f.working
            .put(&Conversation::new(
                "the deploy pipeline broke on tuesday",
                MemoryType::Episodic,
            ))
            .unwrap();

        let response = f
            .router
            .retrieve("default", "deploy pipeline broke tuesday", 5)
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].source, "working_memory");
        assert!(response.results[0].similarity_score > 0.85);
    }

    #[test]
    fn test_factual_dispatch_walks_graph() {
        let f = fixture();
        let vesper = f
            .graph
            .upsert_entity("default", "Vesper", EntityType::Project, None, None)
            .unwrap();
        let mcp = f
            .graph
            .upsert_entity("default", "MCP", EntityType::Concept, None, None)
            .unwrap();
        f.graph
            .upsert_relationship("default", &vesper.id, &mcp.id, "uses", None, 1.0)
            .unwrap();
        f.graph
            .add_fact("default", &mcp.id, "kind", "protocol", 0.95, Utc::now(), None)
            .unwrap();

        let response = f.router.retrieve("default", "what is vesper", 5).unwrap();
        assert_eq!(response.query_class, QueryClass::Factual);
        assert!(
            response
                .results
                .iter()
                .any(|r| r.source == "semantic_graph" && r.content.contains("protocol"))
        );
    }

    #[test]
    fn test_preference_dispatch_reads_preference_index() {
        let f = fixture();
        let pref = f
            .graph
            .upsert_entity(
                "default",
                "prefers rust",
                EntityType::Preference,
                Some("language preference"),
                Some(0.9),
            )
            .unwrap();
        f.graph
            .add_fact("default", &pref.id, "preference", "rust", 0.9, Utc::now(), None)
            .unwrap();

        let response = f
            .router
            .retrieve("default", "what language do I prefer", 5)
            .unwrap();
        assert_eq!(response.query_class, QueryClass::Preference);
        assert!(response.results[0].content.contains("rust"));
    }

    #[test]
    fn test_skill_dispatch_uses_hybrid_search() {
        let f = fixture();
        f.skills
            .add_skill_with_embedding(
                "default",
                &SkillSpec {
                    triggers: vec!["report".to_string()],
                    ..SkillSpec::new("weekly report", "builds the weekly report")
                },
            )
            .unwrap();

        let response = f
            .router
            .retrieve("default", "build the report same way", 5)
            .unwrap();
        assert_eq!(response.query_class, QueryClass::Skill);
        assert_eq!(response.results[0].source, "skill_library");
        assert!(response.results[0].content.contains("weekly report"));
    }

    #[test]
    fn test_temporal_dispatch_scans_time_range() {
        let f = fixture();
        let e = f
            .graph
            .upsert_entity("default", "release", EntityType::Project, None, None)
            .unwrap();
        f.graph
            .add_fact("default", &e.id, "status", "shipped", 0.9, Utc::now(), None)
            .unwrap();

        let response = f
            .router
            .retrieve("default", "what shipped last week", 5)
            .unwrap();
        assert_eq!(response.query_class, QueryClass::Temporal);
        assert!(!response.results.is_empty());
    }

    #[test]
    fn test_complex_fusion_merges_channels() {
        let f = fixture();
        let e = f
            .graph
            .upsert_entity("default", "pipeline", EntityType::Concept, None, None)
            .unwrap();
        f.graph
            .add_fact(
                "default",
                &e.id,
                "purpose",
                "nightly pipeline summary",
                0.9,
                Utc::now(),
                None,
            )
            .unwrap();
        f.skills
            .add_skill_with_embedding(
                "default",
                &SkillSpec {
                    triggers: vec!["pipeline".to_string()],
                    ..SkillSpec::new("pipeline summary", "summarizes the nightly pipeline")
                },
            )
            .unwrap();

        let response = f
            .router
            .retrieve("default", "nightly pipeline summary", 5)
            .unwrap();
        assert_eq!(response.query_class, QueryClass::Complex);
        let sources: std::collections::HashSet<&str> = response
            .results
            .iter()
            .map(|r| r.source.as_str())
            .collect();
        assert!(sources.contains("semantic_graph"));
        assert!(sources.contains("skill_library"));
    }

    #[test]
    fn test_empty_store_yields_empty_results() {
        let f = fixture();
        let response = f
            .router
            .retrieve("default", "what is anything at all", 5)
            .unwrap();
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_parse_time_range() {
        let now = Utc::now();
        let (start, end) = parse_time_range("what happened last week", now);
        assert_eq!(start, Some(now - Duration::days(7)));
        assert_eq!(end, Some(now));

        let (start, _) = parse_time_range("the thing before that", now);
        assert!(start.is_none());
    }
}
