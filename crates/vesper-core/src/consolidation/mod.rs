//! Consolidation pipeline
//!
//! The nightly promotion of working memory into the semantic graph:
//!
//! 1. Read pending conversations from working memory (up to 100)
//! 2. Shallow extraction: keyword entities, preference patterns, facts,
//!    co-mention relationships
//! 3. Apply temporal decay across all relationships
//! 4. Run the three conflict-detection passes
//! 5. Prune weak, unvisited relationships
//! 6. Extract skills from repeated topics and refresh relational vectors
//! 7. Record a backup metadata entry (7-day expiry)
//!
//! Every step is logged. A failure aborts the cycle and files a failure
//! record; prior steps' effects stay in place. Consolidation is idempotent
//! modulo monotonic counters, and at most one cycle runs per process.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Duration, Utc};
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::WorkingMemory;
use crate::conflict::ConflictDetector;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::model::{Conversation, EntityType, SkillSpec};
use crate::skills::SkillLibrary;
use crate::storage::Database;

/// Stats record for one consolidation cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationStats {
    /// Conversations read from working memory
    pub memories_processed: u64,
    /// Entities upserted by extraction
    pub entities_extracted: u64,
    /// Relationships created or reinforced
    pub relationships_created: u64,
    /// Conflicts newly filed
    pub conflicts_detected: u64,
    /// Relationships hard-deleted by the prune step
    pub memories_pruned: u64,
    /// Skills created from repeated topics
    pub skills_extracted: u64,
    /// Wall-clock duration of the cycle
    pub duration_ms: u64,
}

/// One row of the consolidation log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationRecord {
    /// Log row id
    pub id: String,
    /// Cycle start
    pub started_at: chrono::DateTime<Utc>,
    /// Cycle end
    pub finished_at: chrono::DateTime<Utc>,
    /// Whether the cycle completed
    pub success: bool,
    /// Failure message, when the cycle aborted
    pub error: Option<String>,
    /// Stats of the (possibly partial) cycle
    pub stats: ConsolidationStats,
}

/// Pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Conversations consumed per cycle
    pub max_conversations: usize,
    /// Topic repetitions before a skill is extracted
    pub skill_topic_threshold: usize,
    /// Co-occurrence count before a relational vector is computed
    pub relational_min_count: i64,
    /// Backup metadata retention
    pub backup_retention_days: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            max_conversations: 100,
            skill_topic_threshold: 3,
            relational_min_count: 3,
            backup_retention_days: 7,
        }
    }
}

/// Preference patterns applied to conversation text
struct PreferencePatterns {
    patterns: Vec<Regex>,
}

impl PreferencePatterns {
    fn new() -> Self {
        // Shallow, regex-level extraction only. Capture group 1 is the
        // preferred thing.
        let sources = [
            r"(?i)\bprefers?\s+([a-z0-9_+#./ -]+?)\s+over\s+",
            r"(?i)\bprefers?\s+([a-z0-9_+#./ -]+?)(?:\s+for\b|[.,;!]|$)",
            r"(?i)\bfavorite\s+\w+\s+is\s+([a-z0-9_+#./ -]+?)(?:[.,;!]|$)",
            r"(?i)\blikes?\s+using\s+([a-z0-9_+#./ -]+?)(?:[.,;!]|$)",
        ];
        Self {
            patterns: sources
                .iter()
                .filter_map(|s| Regex::new(s).ok())
                .collect(),
        }
    }

    /// First preferred value found in the text, if any
    fn extract(&self, text: &str) -> Option<String> {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(text) {
                if let Some(m) = captures.get(1) {
                    let value = m.as_str().trim().to_lowercase();
                    if !value.is_empty() {
                        return Some(value);
                    }
                }
            }
        }
        None
    }
}

/// The consolidation pipeline (C5)
pub struct ConsolidationPipeline {
    working: Arc<WorkingMemory>,
    graph: Arc<GraphStore>,
    skills: Arc<SkillLibrary>,
    conflicts: ConflictDetector,
    db: Arc<Database>,
    config: ConsolidationConfig,
    patterns: PreferencePatterns,
    /// At most one cycle in flight per process
    running: Mutex<()>,
}

impl ConsolidationPipeline {
    /// Wire up the pipeline over the shared stores
    pub fn new(
        working: Arc<WorkingMemory>,
        graph: Arc<GraphStore>,
        skills: Arc<SkillLibrary>,
        db: Arc<Database>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            working,
            graph,
            skills,
            conflicts: ConflictDetector::new(Arc::clone(&db)),
            db,
            config,
            patterns: PreferencePatterns::new(),
            running: Mutex::new(()),
        }
    }

    /// Run one consolidation cycle for a namespace. Serialized per process;
    /// the stats record is filed to the consolidation log whether the cycle
    /// completes or aborts.
    pub fn run(&self, namespace: &str) -> Result<ConsolidationStats> {
        let _guard = self
            .running
            .lock()
            .map_err(|_| crate::error::VesperError::Init("Pipeline lock poisoned".to_string()))?;

        let started_at = Utc::now();
        let timer = Instant::now();
        let mut stats = ConsolidationStats::default();

        let outcome = self.run_steps(namespace, &mut stats);
        stats.duration_ms = timer.elapsed().as_millis() as u64;

        let log_result = match &outcome {
            Ok(()) => {
                tracing::info!(
                    namespace,
                    memories_processed = stats.memories_processed,
                    entities_extracted = stats.entities_extracted,
                    relationships_created = stats.relationships_created,
                    conflicts_detected = stats.conflicts_detected,
                    memories_pruned = stats.memories_pruned,
                    skills_extracted = stats.skills_extracted,
                    duration_ms = stats.duration_ms,
                    "Consolidation cycle complete"
                );
                self.log_cycle(started_at, true, None, &stats)
            }
            Err(e) => {
                tracing::warn!(namespace, error = %e, "Consolidation cycle aborted");
                self.log_cycle(started_at, false, Some(&e.to_string()), &stats)
            }
        };
        if let Err(e) = log_result {
            // The cycle outcome stands even when the log row cannot be filed
            tracing::warn!(error = %e, "Failed to file consolidation log row");
        }

        outcome.map(|_| stats)
    }

    fn run_steps(&self, namespace: &str, stats: &mut ConsolidationStats) -> Result<()> {
        // Step 1: collect input
        let conversations = self.read_input(namespace)?;
        stats.memories_processed = conversations.len() as u64;
        tracing::debug!(namespace, count = conversations.len(), "Consolidation input read");

        // Step 2: shallow extraction
        for conversation in &conversations {
            self.extract_conversation(namespace, conversation, stats)?;
        }

        // Step 3: decay
        let decayed = self.graph.apply_temporal_decay()?;
        tracing::debug!(namespace, decayed, "Temporal decay applied");

        // Step 4: conflicts
        stats.conflicts_detected = self.conflicts.detect_all(namespace)?;

        // Step 5: prune
        stats.memories_pruned = self.graph.prune_relationships()?;

        // Step 6: skills
        stats.skills_extracted = self.extract_skills(namespace, &conversations)?;
        self.skills
            .compute_relational_vectors(self.config.relational_min_count)?;

        // Step 7: backup descriptor
        self.record_backup(namespace)?;

        Ok(())
    }

    /// Drain the pending queue; fall back to the recency index when no ids
    /// are queued (manual trigger after a quiet period).
    fn read_input(&self, namespace: &str) -> Result<Vec<Conversation>> {
        let ids = self
            .working
            .drain_pending(namespace, self.config.max_conversations)?;

        let mut conversations = Vec::new();
        for id in ids {
            // Evicted or expired entries have simply aged out
            if let Some(conv) = self.working.get(namespace, &id)? {
                conversations.push(conv);
            }
        }
        if conversations.is_empty() {
            conversations = self
                .working
                .list_recent(namespace, self.config.max_conversations)?;
        }
        Ok(conversations)
    }

    fn extract_conversation(
        &self,
        namespace: &str,
        conversation: &Conversation,
        stats: &mut ConsolidationStats,
    ) -> Result<()> {
        let decay_factor = conversation.memory_type.decay_factor();
        let mut entity_ids: Vec<String> = Vec::new();

        for name in &conversation.key_entities {
            let entity = self.graph.upsert_entity(
                namespace,
                name,
                EntityType::Concept,
                None,
                Some(0.8),
            )?;
            entity_ids.push(entity.id);
            stats.entities_extracted += 1;
        }

        // Co-mention edges between entities of the same conversation
        for pair in entity_ids.windows(2) {
            self.graph.upsert_relationship(
                namespace,
                &pair[0],
                &pair[1],
                "co_mentioned",
                Some(&conversation.conversation_id),
                decay_factor,
            )?;
            stats.relationships_created += 1;
        }

        if let Some(value) = self.patterns.extract(&conversation.full_text) {
            let domain = conversation
                .topics
                .iter()
                .next()
                .cloned()
                .unwrap_or_else(|| "general".to_string());
            let entity = self.graph.upsert_entity(
                namespace,
                &format!("prefers {value}"),
                EntityType::Preference,
                Some(&format!("{domain} preference")),
                Some(0.9),
            )?;
            self.graph.add_fact(
                namespace,
                &entity.id,
                "preference",
                &value,
                0.9,
                conversation.timestamp,
                Some(&conversation.conversation_id),
            )?;
            stats.entities_extracted += 1;
        }

        Ok(())
    }

    /// Create a skill for every topic repeated beyond the threshold that has
    /// no skill yet
    fn extract_skills(&self, namespace: &str, conversations: &[Conversation]) -> Result<u64> {
        let mut topic_counts: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for conversation in conversations {
            for topic in &conversation.topics {
                *topic_counts.entry(topic.as_str()).or_default() += 1;
            }
        }

        let mut extracted = 0u64;
        for (topic, count) in topic_counts {
            if count < self.config.skill_topic_threshold {
                continue;
            }
            if self.skills.find_by_name(namespace, topic)?.is_some() {
                continue;
            }
            let spec = SkillSpec {
                triggers: vec![topic.to_string()],
                category: "extracted".to_string(),
                description: format!(
                    "Extracted from {count} recent conversations about {topic}"
                ),
                ..SkillSpec::new(topic, format!("Recurring {topic} workflow"))
            };
            self.skills.add_skill_with_embedding(namespace, &spec)?;
            tracing::info!(namespace, topic, count, "Extracted skill from repeated topic");
            extracted += 1;
        }
        Ok(extracted)
    }

    /// File the backup descriptor and drop expired ones. The backup artifact
    /// itself is produced by an external collaborator.
    fn record_backup(&self, namespace: &str) -> Result<()> {
        let now = Utc::now();
        let expires = now + Duration::days(self.config.backup_retention_days);
        let counts = self.graph.counts(namespace)?;
        let descriptor = serde_json::json!({
            "namespace": namespace,
            "entities": counts.entities,
            "relationships": counts.relationships,
            "facts": counts.facts,
        });

        self.db.with_writer(|conn| {
            conn.execute(
                "DELETE FROM backup_metadata WHERE expires_at < ?1",
                params![now.to_rfc3339()],
            )?;
            conn.execute(
                "INSERT INTO backup_metadata (id, created_at, expires_at, descriptor)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    now.to_rfc3339(),
                    expires.to_rfc3339(),
                    descriptor.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    fn log_cycle(
        &self,
        started_at: chrono::DateTime<Utc>,
        success: bool,
        error: Option<&str>,
        stats: &ConsolidationStats,
    ) -> Result<()> {
        let stats_json = serde_json::to_string(stats).unwrap_or_else(|_| "{}".to_string());
        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO consolidation_log (id, started_at, finished_at, success, error, stats)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    started_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    success as i64,
                    error,
                    stats_json,
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent consolidation log row, if any
    pub fn last_run(&self) -> Result<Option<ConsolidationRecord>> {
        self.db.with_reader(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, started_at, finished_at, success, error, stats
                     FROM consolidation_log ORDER BY started_at DESC LIMIT 1",
                    [],
                    |row| {
                        let stats_json: String = row.get(5)?;
                        Ok(ConsolidationRecord {
                            id: row.get(0)?,
                            started_at: row.get(1)?,
                            finished_at: row.get(2)?,
                            success: row.get::<_, i64>(3)? != 0,
                            error: row.get(4)?,
                            stats: serde_json::from_str(&stats_json).unwrap_or_default(),
                        })
                    },
                )
                .optional()
                .map_err(Into::into);
            record
        })
    }

    /// Total completed cycles on record
    pub fn run_count(&self) -> Result<u64> {
        self.db.with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM consolidation_log", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(Into::into)
        })
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
    use crate::model::MemoryType;

    const DIMS: usize = 64;

    struct Fixture {
        _dir: tempfile::TempDir,
        working: Arc<WorkingMemory>,
        graph: Arc<GraphStore>,
        pipeline: ConsolidationPipeline,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_dir(dir.path()).unwrap());
        let working = Arc::new(WorkingMemory::new(
            Arc::new(MemoryCache::new()),
            &VesperConfig::default(),
        ));
        let graph = Arc::new(GraphStore::new(Arc::clone(&db)));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIMS));
        let skills = Arc::new(SkillLibrary::new(Arc::clone(&db), Some(embedder), DIMS));
        let pipeline = ConsolidationPipeline::new(
            Arc::clone(&working),
            Arc::clone(&graph),
            skills,
            Arc::clone(&db),
            ConsolidationConfig::default(),
        );
        Fixture {
            _dir: dir,
            working,
            graph,
            pipeline,
        }
    }

    fn store_conversation(fixture: &Fixture, text: &str, entities: &[&str], topics: &[&str]) {
        let mut conv = Conversation::new(text, MemoryType::Episodic);
        for e in entities {
            conv.key_entities.insert(e.to_string());
        }
        for t in topics {
            conv.topics.insert(t.to_string());
        }
        fixture.working.put(&conv).unwrap();
        fixture
            .working
            .push_pending("default", &conv.conversation_id)
            .unwrap();
    }

    #[test]
    fn test_preference_patterns() {
        let patterns = PreferencePatterns::new();
        assert_eq!(
            patterns.extract("The user prefers TypeScript over JavaScript"),
            Some("typescript".to_string())
        );
        assert_eq!(
            patterns.extract("I prefer tabs for indentation"),
            Some("tabs".to_string())
        );
        assert_eq!(
            patterns.extract("my favorite editor is helix."),
            Some("helix".to_string())
        );
        assert_eq!(patterns.extract("nothing stated here"), None);
    }

    #[test]
    fn test_cycle_extracts_entities_and_preferences() {
        let fixture = fixture();
        store_conversation(
            &fixture,
            "The user prefers TypeScript over JavaScript for type safety",
            &["typescript", "javascript"],
            &["languages"],
        );

        let stats = fixture.pipeline.run("default").unwrap();
        assert_eq!(stats.memories_processed, 1);
        // two keyword entities + one preference entity
        assert_eq!(stats.entities_extracted, 3);
        assert_eq!(stats.relationships_created, 1);

        let pref = fixture
            .graph
            .get_entity("default", "prefers typescript")
            .unwrap()
            .expect("preference entity");
        let facts = fixture.graph.get_active_facts(&pref.id).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "typescript");
    }

    #[test]
    fn test_cycle_prunes_weak_relationships() {
        let fixture = fixture();
        let a = fixture
            .graph
            .upsert_entity("default", "A", EntityType::Concept, None, None)
            .unwrap();
        let b = fixture
            .graph
            .upsert_entity("default", "B", EntityType::Concept, None, None)
            .unwrap();
        let rel = fixture
            .graph
            .upsert_relationship("default", &a.id, &b.id, "uses", None, 1.0)
            .unwrap();

        // Weak edge, long-dead reinforcement: decay then prune removes it
        fixture
            .pipeline
            .db
            .with_writer(|conn| {
                conn.execute(
                    "UPDATE relationships SET strength = 0.1, last_reinforced = ?1 WHERE id = ?2",
                    params![
                        (Utc::now() - Duration::days(120)).to_rfc3339(),
                        rel.id
                    ],
                )?;
                Ok(())
            })
            .unwrap();

        let stats = fixture.pipeline.run("default").unwrap();
        assert_eq!(stats.memories_pruned, 1);

        // Endpoints survive
        assert!(fixture.graph.get_entity_by_id(&a.id).unwrap().is_some());
        assert!(fixture.graph.get_entity_by_id(&b.id).unwrap().is_some());
    }

    #[test]
    fn test_cycle_extracts_skills_from_repeated_topics() {
        let fixture = fixture();
        for i in 0..3 {
            store_conversation(
                &fixture,
                &format!("conversation {i} about deployments"),
                &[],
                &["deploy service"],
            );
        }

        let stats = fixture.pipeline.run("default").unwrap();
        assert_eq!(stats.skills_extracted, 1);

        // Second cycle sees the skill exists and extracts nothing new
        for i in 0..3 {
            store_conversation(
                &fixture,
                &format!("more {i} about deployments"),
                &[],
                &["deploy service"],
            );
        }
        let stats = fixture.pipeline.run("default").unwrap();
        assert_eq!(stats.skills_extracted, 0);
    }

    #[test]
    fn test_cycle_files_log_and_backup_rows() {
        let fixture = fixture();
        store_conversation(&fixture, "plain conversation", &["vesper"], &[]);

        fixture.pipeline.run("default").unwrap();

        let record = fixture.pipeline.last_run().unwrap().expect("log row");
        assert!(record.success);
        assert!(record.error.is_none());
        assert_eq!(record.stats.memories_processed, 1);
        assert_eq!(fixture.pipeline.run_count().unwrap(), 1);

        let backups: i64 = fixture
            .pipeline
            .db
            .with_reader(|conn| {
                conn.query_row("SELECT COUNT(*) FROM backup_metadata", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_empty_namespace_cycle_is_clean() {
        let fixture = fixture();
        let stats = fixture.pipeline.run("default").unwrap();
        assert_eq!(stats.memories_processed, 0);
        assert_eq!(stats.entities_extracted, 0);
    }
}
