//! Skill library (the procedural memory tier)
//!
//! Retrieval goes through three channels:
//! - trigger search (keyword hit scoring)
//! - embedding search (cosine over stored vectors)
//! - hybrid search (Reciprocal Rank Fusion of the two)
//!
//! plus analogical search over relational vectors: the difference of two
//! skill embeddings is an "edit" that can be applied to a third skill to
//! find its analogue.
//!
//! Full payloads are loaded lazily; `get_summaries` returns lightweight
//! records for context injection.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use lru::LruCache;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::embeddings::{cosine_similarity, vector_difference, vector_sum, Embedder, Embedding};
use crate::error::{Result, VesperError};
use crate::model::{CodeType, Skill, SkillInvocation, SkillRelationship, SkillSpec, SkillSummary};
use crate::search::{reciprocal_rank_fusion, RRF_K};
use crate::storage::Database;

/// Score for a trigger keyword hit
const TRIGGER_HIT: f64 = 1.0;

/// Score for the query appearing in the skill name
const NAME_HIT: f64 = 0.5;

/// Query-embedding cache capacity
const QUERY_CACHE_SIZE: usize = 100;

/// The skill library (C3)
pub struct SkillLibrary {
    db: Arc<Database>,
    embedder: Option<Arc<dyn Embedder>>,
    dimensions: usize,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl SkillLibrary {
    /// Create a skill library. Pass `None` for the embedder to run in
    /// trigger-only mode; embedding and analogical search then return empty.
    pub fn new(db: Arc<Database>, embedder: Option<Arc<dyn Embedder>>, dimensions: usize) -> Self {
        Self {
            db,
            embedder,
            dimensions,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache capacity is non-zero"),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a skill, or update the existing one of the same name with a
    /// version bump. Runs in one transaction so concurrent adds of the same
    /// name cannot interleave.
    pub fn add_skill(&self, namespace: &str, spec: &SkillSpec) -> Result<Skill> {
        let ns = spec.namespace.as_deref().unwrap_or(namespace);
        let id = Skill::id_in_namespace(ns, &spec.name);

        let triggers: Vec<String> = spec.triggers.iter().map(|t| t.to_lowercase()).collect();
        let triggers_json = serde_json::to_string(&triggers).unwrap_or_else(|_| "[]".to_string());
        let prereq_json =
            serde_json::to_string(&spec.prerequisites).unwrap_or_else(|_| "[]".to_string());

        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM skills WHERE namespace = ?1 AND name = ?2",
                    params![ns, spec.name],
                    |row| row.get(0),
                )
                .optional()?;

            let skill = match existing {
                Some(existing_id) => tx.query_row(
                    "UPDATE skills SET
                         summary = ?1, description = ?2, category = ?3, triggers = ?4,
                         code = ?5, code_type = ?6, prerequisites = ?7, version = version + 1
                     WHERE id = ?8
                     RETURNING id, name, summary, description, category, triggers, code,
                               code_type, prerequisites, uses_skills, used_by_skills,
                               success_count, failure_count, avg_user_satisfaction,
                               last_used, is_archived, version, namespace",
                    params![
                        spec.summary,
                        spec.description,
                        spec.category,
                        triggers_json,
                        spec.code,
                        spec.code_type.as_str(),
                        prereq_json,
                        existing_id,
                    ],
                    skill_from_row,
                )?,
                None => tx.query_row(
                    "INSERT INTO skills
                         (id, name, summary, description, category, triggers, code, code_type,
                          prerequisites, uses_skills, used_by_skills, success_count,
                          failure_count, avg_user_satisfaction, last_used, is_archived,
                          version, namespace)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '[]', '[]', 0, 0, 0.0,
                             NULL, 0, 1, ?10)
                     RETURNING id, name, summary, description, category, triggers, code,
                               code_type, prerequisites, uses_skills, used_by_skills,
                               success_count, failure_count, avg_user_satisfaction,
                               last_used, is_archived, version, namespace",
                    params![
                        id,
                        spec.name,
                        spec.summary,
                        spec.description,
                        spec.category,
                        triggers_json,
                        spec.code,
                        spec.code_type.as_str(),
                        prereq_json,
                        ns,
                    ],
                    skill_from_row,
                )?,
            };

            tx.commit()?;
            Ok(skill)
        })
    }

    /// Create a skill and store its embedding (name + summary)
    pub fn add_skill_with_embedding(&self, namespace: &str, spec: &SkillSpec) -> Result<Skill> {
        let mut skill = self.add_skill(namespace, spec)?;

        let Some(embedder) = &self.embedder else {
            return Ok(skill);
        };

        let text = format!("{} {}", skill.name, skill.summary);
        let vector = embedder.embed(&text)?;
        let embedding = Embedding::new(vector, self.dimensions)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO skill_embeddings (skill_id, embedding, dimensions, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(skill_id) DO UPDATE SET
                     embedding = excluded.embedding,
                     dimensions = excluded.dimensions,
                     created_at = excluded.created_at",
                params![skill.id, embedding.to_bytes(), self.dimensions as i64, now],
            )?;
            Ok(())
        })?;

        skill.embedding = Some(embedding.vector);
        Ok(skill)
    }

    /// Record one successful application with the user's satisfaction rating
    pub fn record_success(&self, skill_id: &str, satisfaction: f64) -> Result<()> {
        let satisfaction = satisfaction.clamp(0.0, 1.0);
        let changed = self.db.with_writer(|conn| {
            let changed = conn.execute(
                "UPDATE skills SET
                     avg_user_satisfaction =
                         (avg_user_satisfaction * success_count + ?1) / (success_count + 1),
                     success_count = success_count + 1
                 WHERE id = ?2",
                params![satisfaction, skill_id],
            )?;
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(VesperError::NotFound(format!("Skill '{skill_id}'")));
        }
        Ok(())
    }

    /// Record one failed application
    pub fn record_failure(&self, skill_id: &str) -> Result<()> {
        let changed = self.db.with_writer(|conn| {
            let changed = conn.execute(
                "UPDATE skills SET failure_count = failure_count + 1 WHERE id = ?1",
                params![skill_id],
            )?;
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(VesperError::NotFound(format!("Skill '{skill_id}'")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Trigger search: 1.0 per trigger keyword the query contains, plus 0.5
    /// when the skill name appears in the query or vice versa. Zero-score
    /// skills are dropped.
    pub fn search_by_trigger(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Skill, f64)>> {
        let q = query.to_lowercase();
        let mut scored: Vec<(Skill, f64)> = self
            .all_skills(namespace)?
            .into_iter()
            .filter_map(|skill| {
                let trigger_hit = skill
                    .triggers
                    .iter()
                    .any(|t| !t.is_empty() && q.contains(t.as_str()));
                let name_hit = skill.name.to_lowercase().contains(&q)
                    || q.contains(&skill.name.to_lowercase());
                let score = if trigger_hit { TRIGGER_HIT } else { 0.0 }
                    + if name_hit { NAME_HIT } else { 0.0 };
                if score > 0.0 { Some((skill, score)) } else { None }
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Embedding search: cosine similarity of the query vector against every
    /// skill with a stored embedding. Empty when no embedder is configured.
    pub fn search_by_embedding(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Skill, f64)>> {
        if self.embedder.is_none() {
            return Ok(vec![]);
        }
        let query_vector = self.query_embedding(query)?;

        let mut scored: Vec<(Skill, f64)> = self
            .all_skills(namespace)?
            .into_iter()
            .filter_map(|skill| {
                let vector = skill.embedding.as_ref()?;
                let score = cosine_similarity(&query_vector, vector) as f64;
                Some((skill, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Hybrid search: RRF over the top `2k` trigger hits and the top `2k`
    /// embedding hits. Falls back to single-list RRF over trigger results
    /// when embedding search is unavailable.
    pub fn hybrid_search(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Skill, f64)>> {
        let trigger = self.search_by_trigger(namespace, query, 2 * k)?;
        let embedding = self.search_by_embedding(namespace, query, 2 * k)?;

        let mut by_id: std::collections::HashMap<String, Skill> = std::collections::HashMap::new();
        let trigger_list: Vec<(String, f64)> = trigger
            .into_iter()
            .map(|(skill, score)| {
                let id = skill.id.clone();
                by_id.insert(id.clone(), skill);
                (id, score)
            })
            .collect();
        let embedding_list: Vec<(String, f64)> = embedding
            .into_iter()
            .map(|(skill, score)| {
                let id = skill.id.clone();
                by_id.entry(id.clone()).or_insert(skill);
                (id, score)
            })
            .collect();

        let lists: Vec<Vec<(String, f64)>> = if embedding_list.is_empty() {
            vec![trigger_list]
        } else {
            vec![trigger_list, embedding_list]
        };

        let fused = reciprocal_rank_fusion(&lists, RRF_K);
        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| by_id.remove(&id).map(|skill| (skill, score)))
            .take(k)
            .collect())
    }

    // ------------------------------------------------------------------
    // Co-occurrence and analogy
    // ------------------------------------------------------------------

    /// Record that two skills were used together. The counter increment is a
    /// single insert-or-increment statement; concurrent calls cannot lose
    /// increments.
    pub fn record_co_occurrence(&self, skill_a: &str, skill_b: &str) -> Result<SkillRelationship> {
        if skill_a == skill_b {
            return Err(VesperError::Integrity(format!(
                "Self co-occurrence rejected for skill '{skill_a}'"
            )));
        }
        let (first, second) = crate::model::normalize_pair(skill_a, skill_b);
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();

        self.db.with_writer(|conn| {
            let relationship = conn.query_row(
                "INSERT INTO skill_relationships
                     (id, skill_id_1, skill_id_2, relationship_type,
                      co_occurrence_count, relational_vector, created_at, last_updated)
                 VALUES (?1, ?2, ?3, 'co_occurrence', 1, NULL, ?4, ?4)
                 ON CONFLICT(skill_id_1, skill_id_2, relationship_type) DO UPDATE SET
                     co_occurrence_count = co_occurrence_count + 1,
                     last_updated = excluded.last_updated
                 RETURNING id, skill_id_1, skill_id_2, relationship_type,
                           co_occurrence_count, relational_vector, created_at, last_updated",
                params![id, first, second, now],
                |row| self.skill_relationship_from_row(row),
            )?;
            Ok(relationship)
        })
    }

    /// Compute missing relational vectors for pairs seen at least
    /// `min_count` times where both endpoints have embeddings. Returns the
    /// number of vectors written.
    pub fn compute_relational_vectors(&self, min_count: i64) -> Result<u64> {
        let pending = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sr.id, e1.embedding, e2.embedding
                 FROM skill_relationships sr
                 JOIN skill_embeddings e1 ON e1.skill_id = sr.skill_id_1
                 JOIN skill_embeddings e2 ON e2.skill_id = sr.skill_id_2
                 WHERE sr.co_occurrence_count >= ?1
                   AND sr.relational_vector IS NULL",
            )?;
            let rows = stmt
                .query_map(params![min_count], |row| {
                    let id: String = row.get(0)?;
                    let b1: Vec<u8> = row.get(1)?;
                    let b2: Vec<u8> = row.get(2)?;
                    Ok((id, b1, b2))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut computed = 0u64;
        for (id, bytes_1, bytes_2) in pending {
            let emb_1 = Embedding::from_bytes(&bytes_1, self.dimensions)?;
            let emb_2 = Embedding::from_bytes(&bytes_2, self.dimensions)?;
            let relational = vector_difference(&emb_1.vector, &emb_2.vector);
            let blob = Embedding::new(relational, self.dimensions)?.to_bytes();
            let now = Utc::now().to_rfc3339();

            self.db.with_writer(|conn| {
                conn.execute(
                    "UPDATE skill_relationships
                     SET relational_vector = ?1, last_updated = ?2
                     WHERE id = ?3",
                    params![blob, now, id],
                )?;
                Ok(())
            })?;
            computed += 1;
        }
        Ok(computed)
    }

    /// Analogical search: `target_a : source_a :: ? : source_b`.
    /// Applies the relational vector of `(source_a, target_a)` to
    /// `source_b`'s embedding and ranks every other skill by cosine
    /// similarity to the expected point. `source_b` itself is never returned.
    pub fn analogical_search(
        &self,
        namespace: &str,
        source_a: &str,
        target_a: &str,
        source_b: &str,
        k: usize,
    ) -> Result<Vec<(Skill, f64)>> {
        let (first, second) = crate::model::normalize_pair(source_a, target_a);
        let stored: Option<Vec<u8>> = self.db.with_reader(|conn| {
            let blob = conn
                .query_row(
                    "SELECT relational_vector FROM skill_relationships
                     WHERE skill_id_1 = ?1 AND skill_id_2 = ?2
                       AND relational_vector IS NOT NULL",
                    params![first, second],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(blob)
        })?;

        let Some(blob) = stored else {
            return Err(VesperError::NotFound(format!(
                "Relational vector for ({source_a}, {target_a})"
            )));
        };

        // Stored direction is emb(id2) - emb(id1); flip when the analogy
        // runs against the normalized order.
        let mut relational = Embedding::from_bytes(&blob, self.dimensions)?.vector;
        if source_a != first {
            for x in &mut relational {
                *x = -*x;
            }
        }

        let base = self.embedding_of(source_b)?.ok_or_else(|| {
            VesperError::NotFound(format!("Embedding for skill '{source_b}'"))
        })?;
        let expected = vector_sum(&base, &relational);

        let mut scored: Vec<(Skill, f64)> = self
            .all_skills(namespace)?
            .into_iter()
            .filter(|skill| skill.id != source_b)
            .filter_map(|skill| {
                let vector = skill.embedding.as_ref()?;
                let score = cosine_similarity(&expected, vector) as f64;
                Some((skill, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    // ------------------------------------------------------------------
    // Lazy loading
    // ------------------------------------------------------------------

    /// Lightweight records for context injection, best performers first
    pub fn get_summaries(
        &self,
        namespace: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<SkillSummary>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, summary, category FROM skills
                 WHERE namespace = ?1 AND is_archived = 0
                   AND (?2 IS NULL OR category = ?2)
                 ORDER BY avg_user_satisfaction DESC, success_count DESC
                 LIMIT ?3",
            )?;
            let summaries = stmt
                .query_map(params![namespace, category, limit as i64], |row| {
                    Ok(SkillSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        summary: row.get(2)?,
                        category: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(summaries)
        })
    }

    /// Load a full skill payload, stamping `last_used`
    pub fn load_full(&self, namespace: &str, skill_id: &str) -> Result<Skill> {
        let now = Utc::now().to_rfc3339();
        let skill = self.db.with_writer(|conn| {
            let skill = conn
                .query_row(
                    "UPDATE skills SET last_used = ?1
                     WHERE id = ?2 AND namespace = ?3 AND is_archived = 0
                     RETURNING id, name, summary, description, category, triggers, code,
                               code_type, prerequisites, uses_skills, used_by_skills,
                               success_count, failure_count, avg_user_satisfaction,
                               last_used, is_archived, version, namespace",
                    params![now, skill_id, namespace],
                    skill_from_row,
                )
                .optional()?;
            Ok(skill)
        })?;

        let mut skill = skill.ok_or_else(|| VesperError::NotFound(format!("Skill '{skill_id}'")))?;
        skill.embedding = self.embedding_of(&skill.id)?;
        Ok(skill)
    }

    /// Fetch a skill by name without side effects
    pub fn find_by_name(&self, namespace: &str, name: &str) -> Result<Option<Skill>> {
        let id: Option<String> = self.db.with_reader(|conn| {
            let id = conn
                .query_row(
                    "SELECT id FROM skills
                     WHERE namespace = ?1 AND name = ?2 COLLATE NOCASE AND is_archived = 0",
                    params![namespace, name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })?;
        match id {
            Some(id) => self.get_skill(namespace, &id),
            None => Ok(None),
        }
    }

    /// Fetch a skill without side effects
    pub fn get_skill(&self, namespace: &str, skill_id: &str) -> Result<Option<Skill>> {
        let skill = self.db.with_reader(|conn| {
            let skill = conn
                .query_row(
                    "SELECT id, name, summary, description, category, triggers, code,
                            code_type, prerequisites, uses_skills, used_by_skills,
                            success_count, failure_count, avg_user_satisfaction,
                            last_used, is_archived, version, namespace
                     FROM skills WHERE id = ?1 AND namespace = ?2",
                    params![skill_id, namespace],
                    skill_from_row,
                )
                .optional()?;
            Ok(skill)
        })?;

        match skill {
            Some(mut skill) => {
                skill.embedding = self.embedding_of(&skill.id)?;
                Ok(Some(skill))
            }
            None => Ok(None),
        }
    }

    /// Detect whether a query is invoking a known skill.
    /// "use the X skill" mentions score 0.9; a bare trigger hit scores 0.6.
    pub fn detect_invocation(&self, namespace: &str, query: &str) -> Result<SkillInvocation> {
        let q = query.to_lowercase();

        if let Some(rest) = q
            .strip_prefix("use the ")
            .or_else(|| q.strip_prefix("use "))
        {
            if let Some(name) = rest.strip_suffix(" skill") {
                if let Some(skill) = self.find_by_name(namespace, name.trim())? {
                    return Ok(SkillInvocation {
                        skill_id: Some(skill.id),
                        confidence: 0.9,
                    });
                }
            }
        }

        let hits = self.search_by_trigger(namespace, query, 1)?;
        if let Some((skill, score)) = hits.into_iter().next() {
            if score >= TRIGGER_HIT {
                return Ok(SkillInvocation {
                    skill_id: Some(skill.id),
                    confidence: 0.6,
                });
            }
        }

        Ok(SkillInvocation::default())
    }

    /// Number of skills in a namespace
    pub fn count(&self, namespace: &str) -> Result<i64> {
        self.db.with_reader(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM skills WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Non-archived skills of a namespace with their embeddings attached
    fn all_skills(&self, namespace: &str) -> Result<Vec<Skill>> {
        let rows = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name, s.summary, s.description, s.category, s.triggers,
                        s.code, s.code_type, s.prerequisites, s.uses_skills, s.used_by_skills,
                        s.success_count, s.failure_count, s.avg_user_satisfaction,
                        s.last_used, s.is_archived, s.version, s.namespace, e.embedding
                 FROM skills s
                 LEFT JOIN skill_embeddings e ON e.skill_id = s.id
                 WHERE s.namespace = ?1 AND s.is_archived = 0",
            )?;
            let rows = stmt
                .query_map(params![namespace], |row| {
                    let skill = skill_from_row(row)?;
                    let blob: Option<Vec<u8>> = row.get(18)?;
                    Ok((skill, blob))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(mut skill, blob)| {
                if let Some(bytes) = blob {
                    skill.embedding = Some(Embedding::from_bytes(&bytes, self.dimensions)?.vector);
                }
                Ok(skill)
            })
            .collect()
    }

    fn embedding_of(&self, skill_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self.db.with_reader(|conn| {
            let blob = conn
                .query_row(
                    "SELECT embedding FROM skill_embeddings WHERE skill_id = ?1",
                    params![skill_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(blob)
        })?;
        match blob {
            Some(bytes) => Ok(Some(Embedding::from_bytes(&bytes, self.dimensions)?.vector)),
            None => Ok(None),
        }
    }

    /// Embed a query, reusing the LRU cache for repeated queries
    fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Ok(vector.clone());
            }
        }
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| VesperError::Upstream("No embedder configured".to_string()))?;
        let vector = embedder.embed(query)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    fn skill_relationship_from_row(&self, row: &Row<'_>) -> rusqlite::Result<SkillRelationship> {
        let blob: Option<Vec<u8>> = row.get(5)?;
        let relational_vector = blob.and_then(|bytes| {
            Embedding::from_bytes(&bytes, self.dimensions)
                .ok()
                .map(|e| e.vector)
        });
        Ok(SkillRelationship {
            id: row.get(0)?,
            skill_id_1: row.get(1)?,
            skill_id_2: row.get(2)?,
            relationship_type: row.get(3)?,
            co_occurrence_count: row.get(4)?,
            relational_vector,
            created_at: row.get(6)?,
            last_updated: row.get(7)?,
        })
    }
}

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<Skill> {
    let triggers: String = row.get(5)?;
    let code_type: String = row.get(7)?;
    let prerequisites: String = row.get(8)?;
    let uses_skills: String = row.get(9)?;
    let used_by_skills: String = row.get(10)?;
    Ok(Skill {
        id: row.get(0)?,
        name: row.get(1)?,
        summary: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        triggers: serde_json::from_str(&triggers).unwrap_or_default(),
        code: row.get(6)?,
        code_type: CodeType::parse_name(&code_type).unwrap_or_default(),
        prerequisites: serde_json::from_str(&prerequisites).unwrap_or_default(),
        uses_skills: serde_json::from_str(&uses_skills).unwrap_or_default(),
        used_by_skills: serde_json::from_str(&used_by_skills).unwrap_or_default(),
        success_count: row.get(11)?,
        failure_count: row.get(12)?,
        avg_user_satisfaction: row.get(13)?,
        last_used: row.get(14)?,
        is_archived: row.get::<_, i64>(15)? != 0,
        version: row.get(16)?,
        namespace: row.get(17)?,
        embedding: None,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;

    const DIMS: usize = 64;

    fn library() -> (tempfile::TempDir, SkillLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_dir(dir.path()).unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIMS));
        (dir, SkillLibrary::new(db, Some(embedder), DIMS))
    }

    fn spec(name: &str, summary: &str, triggers: &[&str]) -> SkillSpec {
        SkillSpec {
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            category: "data".to_string(),
            ..SkillSpec::new(name, summary)
        }
    }

    #[test]
    fn test_add_skill_and_version_bump() {
        let (_dir, lib) = library();
        let first = lib
            .add_skill("default", &spec("sort list", "sorts a list", &["sort"]))
            .unwrap();
        assert_eq!(first.id, "skill_sort_list");
        assert_eq!(first.version, 1);

        let second = lib
            .add_skill("default", &spec("sort list", "sorts any list", &["sort"]))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.summary, "sorts any list");
        assert_eq!(lib.count("default").unwrap(), 1);
    }

    #[test]
    fn test_trigger_search_scoring() {
        let (_dir, lib) = library();
        lib.add_skill("default", &spec("sort list", "sorts a list", &["sort", "order"]))
            .unwrap();
        lib.add_skill("default", &spec("render chart", "draws a chart", &["chart"]))
            .unwrap();

        // Trigger hit plus name hit: 1.5
        let hits = lib.search_by_trigger("default", "sort list by key", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 1.5).abs() < 1e-9);

        // Trigger hit only: 1.0
        let hits = lib.search_by_trigger("default", "order these rows", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-9);

        // No hits drop out entirely
        assert!(lib.search_by_trigger("default", "bake bread", 5).unwrap().is_empty());
    }

    #[test]
    fn test_embedding_search_ranks_by_similarity() {
        let (_dir, lib) = library();
        lib.add_skill_with_embedding("default", &spec("sort list", "sorts a list", &[]))
            .unwrap();
        lib.add_skill_with_embedding("default", &spec("render chart", "draws a chart", &[]))
            .unwrap();

        let hits = lib.search_by_embedding("default", "sort the list", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.name, "sort list");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn test_hybrid_search_fuses_channels() {
        let (_dir, lib) = library();
        lib.add_skill_with_embedding("default", &spec("sort list", "sorts a list", &["sort"]))
            .unwrap();
        lib.add_skill_with_embedding("default", &spec("render chart", "draws a chart", &["chart"]))
            .unwrap();

        let hits = lib.hybrid_search("default", "sort the list please", 2).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0.name, "sort list");
        // RRF scores: appearing in both lists beats appearing in one
        if hits.len() == 2 {
            assert!(hits[0].1 > hits[1].1);
        }
    }

    #[test]
    fn test_hybrid_without_embedder_uses_trigger_list() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_dir(dir.path()).unwrap());
        let lib = SkillLibrary::new(db, None, DIMS);
        lib.add_skill("default", &spec("sort list", "sorts a list", &["sort"]))
            .unwrap();

        let hits = lib.hybrid_search("default", "sort things", 5).unwrap();
        assert_eq!(hits.len(), 1);
        // Single-list RRF score for rank 0
        assert!((hits[0].1 - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_co_occurrence_is_insert_or_increment() {
        let (_dir, lib) = library();
        lib.add_skill("default", &spec("sort list", "s", &[])).unwrap();
        lib.add_skill("default", &spec("sort map", "s", &[])).unwrap();

        let first = lib
            .record_co_occurrence("skill_sort_list", "skill_sort_map")
            .unwrap();
        assert_eq!(first.co_occurrence_count, 1);

        // Reversed argument order hits the same normalized row
        let second = lib
            .record_co_occurrence("skill_sort_map", "skill_sort_list")
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.co_occurrence_count, 2);
        assert_eq!(second.skill_id_1, "skill_sort_list");
        assert_eq!(second.skill_id_2, "skill_sort_map");

        assert!(lib.record_co_occurrence("skill_x", "skill_x").is_err());
    }

    #[test]
    fn test_relational_vectors_and_analogy() {
        let (_dir, lib) = library();
        lib.add_skill_with_embedding("default", &spec("sort list", "sort a list", &[]))
            .unwrap();
        lib.add_skill_with_embedding("default", &spec("sort map", "sort a map", &[]))
            .unwrap();
        lib.add_skill_with_embedding("default", &spec("filter list", "filter a list", &[]))
            .unwrap();
        lib.add_skill_with_embedding("default", &spec("filter map", "filter a map", &[]))
            .unwrap();
        lib.add_skill_with_embedding("default", &spec("render chart", "draw a chart", &[]))
            .unwrap();

        for _ in 0..3 {
            lib.record_co_occurrence("skill_sort_list", "skill_sort_map")
                .unwrap();
        }

        // Threshold above the count computes nothing
        assert_eq!(lib.compute_relational_vectors(5).unwrap(), 0);
        assert_eq!(lib.compute_relational_vectors(3).unwrap(), 1);
        // Already computed: idempotent
        assert_eq!(lib.compute_relational_vectors(3).unwrap(), 0);

        let hits = lib
            .analogical_search(
                "default",
                "skill_sort_list",
                "skill_sort_map",
                "skill_filter_list",
                2,
            )
            .unwrap();
        assert_eq!(hits[0].0.id, "skill_filter_map");
        // source_b never appears in results
        assert!(hits.iter().all(|(s, _)| s.id != "skill_filter_list"));
    }

    #[test]
    fn test_analogy_without_vector_is_not_found() {
        let (_dir, lib) = library();
        lib.add_skill_with_embedding("default", &spec("a b", "a", &[])).unwrap();
        let err = lib
            .analogical_search("default", "skill_a_b", "skill_c_d", "skill_a_b", 1)
            .unwrap_err();
        assert!(matches!(err, VesperError::NotFound(_)));
    }

    #[test]
    fn test_outcome_tracking() {
        let (_dir, lib) = library();
        lib.add_skill("default", &spec("sort list", "s", &[])).unwrap();

        lib.record_success("skill_sort_list", 1.0).unwrap();
        lib.record_success("skill_sort_list", 0.5).unwrap();
        lib.record_failure("skill_sort_list").unwrap();

        let skill = lib.get_skill("default", "skill_sort_list").unwrap().unwrap();
        assert_eq!(skill.success_count, 2);
        assert_eq!(skill.failure_count, 1);
        assert!((skill.avg_user_satisfaction - 0.75).abs() < 1e-9);

        assert!(matches!(
            lib.record_success("skill_missing", 1.0),
            Err(VesperError::NotFound(_))
        ));
    }

    #[test]
    fn test_lazy_loading_updates_last_used() {
        let (_dir, lib) = library();
        lib.add_skill("default", &spec("sort list", "sorts a list", &[]))
            .unwrap();

        let summaries = lib.get_summaries("default", 10, None).unwrap();
        assert_eq!(summaries.len(), 1);

        let loaded = lib.load_full("default", "skill_sort_list").unwrap();
        assert!(loaded.last_used.is_some());

        assert!(matches!(
            lib.load_full("default", "skill_missing"),
            Err(VesperError::NotFound(_))
        ));
    }

    #[test]
    fn test_summaries_order_and_category_filter() {
        let (_dir, lib) = library();
        lib.add_skill("default", &spec("good skill", "works", &[])).unwrap();
        lib.add_skill("default", &spec("great skill", "works better", &[]))
            .unwrap();
        lib.record_success("skill_great_skill", 1.0).unwrap();

        let summaries = lib.get_summaries("default", 10, None).unwrap();
        assert_eq!(summaries[0].id, "skill_great_skill");

        assert!(lib.get_summaries("default", 10, Some("nonexistent")).unwrap().is_empty());
        assert_eq!(lib.get_summaries("default", 10, Some("data")).unwrap().len(), 2);
    }

    #[test]
    fn test_detect_invocation() {
        let (_dir, lib) = library();
        lib.add_skill("default", &spec("sort list", "sorts a list", &["sort"]))
            .unwrap();

        let explicit = lib
            .detect_invocation("default", "use the sort list skill")
            .unwrap();
        assert_eq!(explicit.skill_id.as_deref(), Some("skill_sort_list"));
        assert!((explicit.confidence - 0.9).abs() < 1e-9);

        let trigger = lib.detect_invocation("default", "please sort these").unwrap();
        assert_eq!(trigger.skill_id.as_deref(), Some("skill_sort_list"));
        assert!((trigger.confidence - 0.6).abs() < 1e-9);

        let none = lib.detect_invocation("default", "bake bread").unwrap();
        assert!(none.skill_id.is_none());
        assert_eq!(none.confidence, 0.0);
    }

    #[test]
    fn test_mis_sized_blob_fails_fast() {
        let (_dir, lib) = library();
        lib.add_skill_with_embedding("default", &spec("sort list", "s", &[]))
            .unwrap();

        // Corrupt the blob
        lib.db
            .with_writer(|conn| {
                conn.execute(
                    "UPDATE skill_embeddings SET embedding = X'DEADBEEF' WHERE skill_id = 'skill_sort_list'",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let err = lib.get_skill("default", "skill_sort_list").unwrap_err();
        assert!(matches!(err, VesperError::Integrity(_)));
    }
}
