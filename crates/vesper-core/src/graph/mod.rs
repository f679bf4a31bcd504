//! Semantic graph store (the persistent memory tier)
//!
//! Entities, typed relationships with decaying strength, and temporal facts
//! with validity windows, all keyed by id so the graph may contain cycles.
//! Traversals carry an explicit visited set to guarantee termination.
//!
//! Upsert semantics:
//! - `upsert_entity`: existing `(namespace, name, type)` rows only get
//!   `last_accessed`/`access_count` bumped; new rows default confidence 1.0
//! - `upsert_relationship`: existing tuples get `strength + 0.2` (capped at
//!   1.0) and a fresh `last_reinforced`; new edges default strength 0.8
//!
//! Both are single `INSERT .. ON CONFLICT DO UPDATE` statements so concurrent
//! upserts cannot lose updates.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{Result, VesperError};
use crate::model::{
    Entity, EntityType, Fact, FactChain, GraphNeighborhood, Relationship, ScoredEntity,
    TraversalPath,
};
use crate::storage::Database;

/// Decay half-life base: strength halves roughly every 21 days
const DECAY_TAU_DAYS: f64 = 30.0;

/// Score damping per traversal hop
const PPR_DAMPING: f64 = 0.7;

/// Enqueue threshold for plain PPR
const PPR_THRESHOLD: f64 = 0.1;

/// Enqueue threshold for fact-collecting PPR (walks further)
const PPR_FACT_THRESHOLD: f64 = 0.05;

/// Strength floor below which the pipeline may prune an edge
pub const PRUNE_STRENGTH_FLOOR: f64 = 0.05;

/// Endpoint access count at or above which an edge is never pruned
pub const PRUNE_ACCESS_FLOOR: i64 = 3;

/// The semantic graph store (C2)
pub struct GraphStore {
    db: Arc<Database>,
}

impl GraphStore {
    /// Create a graph store over a shared database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Insert an entity or touch the existing `(namespace, name, type)` row
    pub fn upsert_entity(
        &self,
        namespace: &str,
        name: &str,
        entity_type: EntityType,
        description: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<Entity> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let confidence = confidence.unwrap_or(1.0).clamp(0.0, 1.0);

        self.db.with_writer(|conn| {
            let entity = conn.query_row(
                "INSERT INTO entities
                     (id, name, entity_type, description, confidence,
                      created_at, last_accessed, access_count, is_archived, namespace)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0, 0, ?7)
                 ON CONFLICT(namespace, name, entity_type) DO UPDATE SET
                     last_accessed = excluded.last_accessed,
                     access_count = access_count + 1
                 RETURNING id, name, entity_type, description, confidence,
                           created_at, last_accessed, access_count, is_archived, namespace",
                params![
                    id,
                    name,
                    entity_type.as_str(),
                    description,
                    confidence,
                    now.to_rfc3339(),
                    namespace,
                ],
                entity_from_row,
            )?;
            Ok(entity)
        })
    }

    /// Look up an entity by name, bumping its access stats
    pub fn get_entity(&self, namespace: &str, name: &str) -> Result<Option<Entity>> {
        let now = Utc::now();
        self.db.with_writer(|conn| {
            let entity = conn
                .query_row(
                    "UPDATE entities SET
                         last_accessed = ?1,
                         access_count = access_count + 1
                     WHERE namespace = ?2 AND name = ?3 COLLATE NOCASE AND is_archived = 0
                     RETURNING id, name, entity_type, description, confidence,
                               created_at, last_accessed, access_count, is_archived, namespace",
                    params![now.to_rfc3339(), namespace, name],
                    entity_from_row,
                )
                .optional()?;
            Ok(entity)
        })
    }

    /// Look up an entity by id without bumping access stats
    pub fn get_entity_by_id(&self, id: &str) -> Result<Option<Entity>> {
        self.db.with_reader(|conn| {
            let entity = conn
                .query_row(
                    "SELECT id, name, entity_type, description, confidence,
                            created_at, last_accessed, access_count, is_archived, namespace
                     FROM entities WHERE id = ?1",
                    params![id],
                    entity_from_row,
                )
                .optional()?;
            Ok(entity)
        })
    }

    /// Delete an entity; relationships and facts cascade
    pub fn delete_entity(&self, id: &str) -> Result<bool> {
        self.db.with_writer(|conn| {
            let changed = conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Insert a relationship or reinforce the existing tuple
    pub fn upsert_relationship(
        &self,
        namespace: &str,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
        evidence: Option<&str>,
        decay_factor: f64,
    ) -> Result<Relationship> {
        if source_id == target_id {
            return Err(VesperError::Integrity(format!(
                "Self-relationship rejected for entity '{source_id}'"
            )));
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;

            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM entities WHERE id IN (?1, ?2)",
                params![source_id, target_id],
                |row| row.get(0),
            )?;
            if exists != 2 {
                return Err(VesperError::Integrity(format!(
                    "Relationship endpoints must exist: {source_id} -> {target_id}"
                )));
            }

            let mut relationship = tx.query_row(
                "INSERT INTO relationships
                     (id, source_id, target_id, relation_type, strength, evidence,
                      created_at, last_reinforced, access_count, is_archived,
                      namespace, decay_factor)
                 VALUES (?1, ?2, ?3, ?4, 0.8, '[]', ?5, ?5, 0, 0, ?6, ?7)
                 ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET
                     strength = MIN(1.0, strength + 0.2),
                     last_reinforced = excluded.last_reinforced
                 RETURNING id, source_id, target_id, relation_type, strength, evidence,
                           created_at, last_reinforced, access_count, is_archived,
                           namespace, decay_factor",
                params![
                    id,
                    source_id,
                    target_id,
                    relation_type,
                    now.to_rfc3339(),
                    namespace,
                    decay_factor,
                ],
                relationship_from_row,
            )?;

            if let Some(conversation_id) = evidence {
                if !relationship.evidence.iter().any(|e| e == conversation_id) {
                    relationship.evidence.push(conversation_id.to_string());
                    let evidence_json = serde_json::to_string(&relationship.evidence)
                        .unwrap_or_else(|_| "[]".to_string());
                    tx.execute(
                        "UPDATE relationships SET evidence = ?1 WHERE id = ?2",
                        params![evidence_json, relationship.id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(relationship)
        })
    }

    /// Apply exponential decay to every non-archived relationship.
    /// Returns the number of edges updated. Pruning is a separate step owned
    /// by the consolidation pipeline.
    pub fn apply_temporal_decay(&self) -> Result<u64> {
        let now = Utc::now();
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut updated = 0u64;
            {
                let mut stmt = tx.prepare(
                    "SELECT id, strength, last_reinforced, decay_factor
                     FROM relationships WHERE is_archived = 0",
                )?;
                let rows: Vec<(String, f64, DateTime<Utc>, f64)> = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?;

                let mut update =
                    tx.prepare("UPDATE relationships SET strength = ?1 WHERE id = ?2")?;
                for (id, strength, last_reinforced, decay_factor) in rows {
                    let days = (now - last_reinforced).num_seconds() as f64 / 86_400.0;
                    if days <= 0.0 {
                        continue;
                    }
                    let tau = DECAY_TAU_DAYS / decay_factor.max(f64::MIN_POSITIVE);
                    let decayed = (strength * (-days / tau).exp()).clamp(0.0, 1.0);
                    update.execute(params![decayed, id])?;
                    updated += 1;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Hard-delete weak, unvisited edges: `strength < 0.05` and both endpoint
    /// entities accessed fewer than 3 times. Endpoint entities survive.
    pub fn prune_relationships(&self) -> Result<u64> {
        self.db.with_writer(|conn| {
            let deleted = conn.execute(
                "DELETE FROM relationships
                 WHERE strength < ?1
                   AND is_archived = 0
                   AND (SELECT access_count FROM entities WHERE id = source_id) < ?2
                   AND (SELECT access_count FROM entities WHERE id = target_id) < ?2",
                params![PRUNE_STRENGTH_FLOOR, PRUNE_ACCESS_FLOOR],
            )?;
            Ok(deleted as u64)
        })
    }

    // ------------------------------------------------------------------
    // Facts
    // ------------------------------------------------------------------

    /// Record a temporal fact. The `(entity_id, property, value, valid_from)`
    /// tuple is unique; re-adding an identical fact returns the existing row.
    pub fn add_fact(
        &self,
        namespace: &str,
        entity_id: &str,
        property: &str,
        value: &str,
        confidence: f64,
        valid_from: DateTime<Utc>,
        source_conversation: Option<&str>,
    ) -> Result<Fact> {
        let id = Uuid::new_v4().to_string();
        let confidence = confidence.clamp(0.0, 1.0);

        self.db.with_writer(|conn| {
            let fact = conn.query_row(
                "INSERT INTO facts
                     (id, entity_id, property, value, confidence, valid_from,
                      valid_until, source_conversation, contradicts, is_archived, namespace)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, '[]', 0, ?8)
                 ON CONFLICT(entity_id, property, value, valid_from) DO UPDATE SET
                     confidence = confidence
                 RETURNING id, entity_id, property, value, confidence, valid_from,
                           valid_until, source_conversation, contradicts, is_archived, namespace",
                params![
                    id,
                    entity_id,
                    property,
                    value,
                    confidence,
                    valid_from.to_rfc3339(),
                    source_conversation,
                    namespace,
                ],
                fact_from_row,
            )?;
            Ok(fact)
        })
    }

    /// Close a fact's validity window (active -> superseded)
    pub fn close_fact(&self, fact_id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.db.with_writer(|conn| {
            let changed = conn.execute(
                "UPDATE facts SET valid_until = ?1
                 WHERE id = ?2 AND valid_until IS NULL",
                params![at.to_rfc3339(), fact_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Archive a fact (superseded -> archived); archived facts are never
    /// returned from queries
    pub fn archive_fact(&self, fact_id: &str) -> Result<bool> {
        self.db.with_writer(|conn| {
            let changed = conn.execute(
                "UPDATE facts SET is_archived = 1 WHERE id = ?1",
                params![fact_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Fetch a fact by id
    pub fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>> {
        self.db.with_reader(|conn| {
            let fact = conn
                .query_row(
                    "SELECT id, entity_id, property, value, confidence, valid_from,
                            valid_until, source_conversation, contradicts, is_archived, namespace
                     FROM facts WHERE id = ?1",
                    params![fact_id],
                    fact_from_row,
                )
                .optional()?;
            Ok(fact)
        })
    }

    /// Currently-valid facts for an entity
    pub fn get_active_facts(&self, entity_id: &str) -> Result<Vec<Fact>> {
        let now = Utc::now().to_rfc3339();
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_id, property, value, confidence, valid_from,
                        valid_until, source_conversation, contradicts, is_archived, namespace
                 FROM facts
                 WHERE entity_id = ?1 AND is_archived = 0
                   AND (valid_until IS NULL OR valid_until > ?2)
                 ORDER BY confidence DESC",
            )?;
            let facts = stmt
                .query_map(params![entity_id, now], fact_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(facts)
        })
    }

    /// Facts sourced from a conversation; used by the delete cascade
    pub fn purge_conversation_facts(&self, conversation_id: &str) -> Result<u64> {
        self.db.with_writer(|conn| {
            let deleted = conn.execute(
                "DELETE FROM facts WHERE source_conversation = ?1",
                params![conversation_id],
            )?;
            Ok(deleted as u64)
        })
    }

    /// Facts whose validity window intersects `[start, end]`
    pub fn get_by_time_range(
        &self,
        namespace: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fact>> {
        let start = start.map(|t| t.to_rfc3339());
        let end = end.map(|t| t.to_rfc3339());
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_id, property, value, confidence, valid_from,
                        valid_until, source_conversation, contradicts, is_archived, namespace
                 FROM facts
                 WHERE namespace = ?1 AND is_archived = 0
                   AND (?2 IS NULL OR valid_until IS NULL OR valid_until >= ?2)
                   AND (?3 IS NULL OR valid_from <= ?3)
                 ORDER BY valid_from DESC",
            )?;
            let facts = stmt
                .query_map(params![namespace, start, end], fact_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(facts)
        })
    }

    /// Preference entities with their currently-valid facts, optionally
    /// filtered by a domain substring of the entity name
    pub fn get_preferences(
        &self,
        namespace: &str,
        domain: Option<&str>,
    ) -> Result<Vec<(Entity, Vec<Fact>)>> {
        let entities = self.db.with_reader(|conn| {
            let pattern = domain
                .map(|d| format!("%{}%", d.to_lowercase()))
                .unwrap_or_else(|| "%".to_string());
            let mut stmt = conn.prepare(
                "SELECT id, name, entity_type, description, confidence,
                        created_at, last_accessed, access_count, is_archived, namespace
                 FROM entities
                 WHERE namespace = ?1 AND entity_type = 'preference' AND is_archived = 0
                   AND LOWER(name) LIKE ?2
                 ORDER BY last_accessed DESC",
            )?;
            let entities = stmt
                .query_map(params![namespace, pattern], entity_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entities)
        })?;

        let mut out = Vec::with_capacity(entities.len());
        for entity in entities {
            let facts = self.get_active_facts(&entity.id)?;
            out.push((entity, facts));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Bounded-depth personalized PageRank from an entity.
    /// Returns visited entities sorted by propagated score descending.
    pub fn personalized_pagerank(
        &self,
        entity_id: &str,
        depth: usize,
    ) -> Result<Vec<ScoredEntity>> {
        let walk = self.walk(entity_id, depth, PPR_THRESHOLD)?;
        Ok(walk.entities)
    }

    /// Fact-collecting personalized PageRank: additionally gathers every
    /// currently-valid fact of visited entities, the paths taken, and chain
    /// records for paths longer than two hops.
    pub fn personalized_pagerank_with_facts(
        &self,
        entity_id: &str,
        depth: usize,
    ) -> Result<GraphNeighborhood> {
        let now = Utc::now();
        let walk = self.walk(entity_id, depth, PPR_FACT_THRESHOLD)?;

        let mut facts: Vec<Fact> = Vec::new();
        let mut seen_facts: HashSet<String> = HashSet::new();
        for scored in &walk.entities {
            for fact in self.get_active_facts(&scored.entity.id)? {
                if fact.is_valid_at(now) && seen_facts.insert(fact.id.clone()) {
                    facts.push(fact);
                }
            }
        }
        facts.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut chains = Vec::new();
        for (path, score) in walk
            .paths
            .iter()
            .map(|p| (&p.entity_ids, walk.score_of(p.entity_ids.last())))
        {
            if path.len() <= 2 {
                continue;
            }
            let mut names = Vec::with_capacity(path.len());
            for id in path {
                match walk.name_of(id) {
                    Some(name) => names.push(name),
                    None => names.push(id.clone()),
                }
            }
            chains.push(FactChain {
                entity_names: names,
                score,
            });
        }

        Ok(GraphNeighborhood {
            entities: walk.entities,
            facts,
            paths: walk.paths,
            chains,
        })
    }

    fn walk(&self, entity_id: &str, depth: usize, threshold: f64) -> Result<Walk> {
        let root = self
            .get_entity_by_id(entity_id)?
            .ok_or_else(|| VesperError::NotFound(format!("Entity '{entity_id}'")))?;

        let mut entities: Vec<ScoredEntity> = Vec::new();
        let mut paths: Vec<TraversalPath> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut traversed_edges: Vec<String> = Vec::new();

        let mut queue: VecDeque<Frame> = VecDeque::new();
        queue.push_back(Frame {
            entity: root,
            score: 1.0,
            depth: 0,
            path: vec![entity_id.to_string()],
            last_relation: String::new(),
        });

        while let Some(frame) = queue.pop_front() {
            if !visited.insert(frame.entity.id.clone()) {
                continue;
            }

            if frame.depth > 0 {
                paths.push(TraversalPath {
                    entity_ids: frame.path.clone(),
                    last_relation: frame.last_relation.clone(),
                });
            }
            entities.push(ScoredEntity {
                entity: frame.entity.clone(),
                score: frame.score,
            });

            if frame.depth >= depth {
                continue;
            }

            for (edge_id, neighbor_id, strength, relation_type) in
                self.neighbors(&frame.entity.id)?
            {
                if visited.contains(&neighbor_id) {
                    continue;
                }
                let child_score = frame.score * strength * PPR_DAMPING;
                if child_score <= threshold {
                    continue;
                }
                let Some(neighbor) = self.get_entity_by_id(&neighbor_id)? else {
                    continue;
                };
                if neighbor.is_archived {
                    continue;
                }
                traversed_edges.push(edge_id);
                let mut path = frame.path.clone();
                path.push(neighbor_id);
                queue.push_back(Frame {
                    entity: neighbor,
                    score: child_score,
                    depth: frame.depth + 1,
                    path,
                    last_relation: relation_type,
                });
            }
        }

        self.record_traversal(&visited, &traversed_edges)?;

        entities.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(Walk { entities, paths })
    }

    /// Non-archived edges touching an entity: (edge id, other endpoint,
    /// strength, relation type)
    fn neighbors(&self, entity_id: &str) -> Result<Vec<(String, String, f64, String)>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, strength, relation_type
                 FROM relationships
                 WHERE (source_id = ?1 OR target_id = ?1) AND is_archived = 0",
            )?;
            let edges = stmt
                .query_map(params![entity_id], |row| {
                    let id: String = row.get(0)?;
                    let source: String = row.get(1)?;
                    let target: String = row.get(2)?;
                    let strength: f64 = row.get(3)?;
                    let relation: String = row.get(4)?;
                    Ok((id, source, target, strength, relation))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(edges
                .into_iter()
                .map(|(id, source, target, strength, relation)| {
                    let other = if source == entity_id { target } else { source };
                    (id, other, strength, relation)
                })
                .collect())
        })
    }

    /// Reads count: bump access stats for visited entities and edges
    fn record_traversal(&self, entity_ids: &HashSet<String>, edge_ids: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            {
                let mut touch_entity = tx.prepare(
                    "UPDATE entities SET last_accessed = ?1, access_count = access_count + 1
                     WHERE id = ?2",
                )?;
                for id in entity_ids {
                    touch_entity.execute(params![now, id])?;
                }
                let mut touch_edge = tx
                    .prepare("UPDATE relationships SET access_count = access_count + 1 WHERE id = ?1")?;
                for id in edge_ids {
                    touch_edge.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    /// Distinct namespaces present in the graph
    pub fn namespaces(&self) -> Result<Vec<String>> {
        self.db.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT namespace FROM entities ORDER BY namespace")?;
            let namespaces = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(namespaces)
        })
    }

    /// Most recently accessed entities of a namespace
    pub fn list_entities(&self, namespace: &str, limit: usize) -> Result<Vec<Entity>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, entity_type, description, confidence,
                        created_at, last_accessed, access_count, is_archived, namespace
                 FROM entities
                 WHERE namespace = ?1 AND is_archived = 0
                 ORDER BY last_accessed DESC
                 LIMIT ?2",
            )?;
            let entities = stmt
                .query_map(params![namespace, limit as i64], entity_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entities)
        })
    }

    /// Row counts for a namespace
    pub fn counts(&self, namespace: &str) -> Result<GraphCounts> {
        self.db.with_reader(|conn| {
            let count = |sql: &str| -> Result<i64> {
                conn.query_row(sql, params![namespace], |row| row.get(0))
                    .map_err(Into::into)
            };
            Ok(GraphCounts {
                entities: count("SELECT COUNT(*) FROM entities WHERE namespace = ?1")?,
                relationships: count("SELECT COUNT(*) FROM relationships WHERE namespace = ?1")?,
                facts: count("SELECT COUNT(*) FROM facts WHERE namespace = ?1")?,
                conflicts: count("SELECT COUNT(*) FROM conflicts WHERE namespace = ?1")?,
            })
        })
    }

    /// Longest entity name mentioned in a free-text query, if any.
    /// Matching is case-insensitive substring containment; the longest name
    /// wins so "Model Context Protocol" beats "Model".
    pub fn find_entity_in_text(&self, namespace: &str, text: &str) -> Result<Option<Entity>> {
        self.db.with_reader(|conn| {
            let entity = conn
                .query_row(
                    "SELECT id, name, entity_type, description, confidence,
                            created_at, last_accessed, access_count, is_archived, namespace
                     FROM entities
                     WHERE namespace = ?1 AND is_archived = 0
                       AND INSTR(LOWER(?2), LOWER(name)) > 0
                     ORDER BY LENGTH(name) DESC
                     LIMIT 1",
                    params![namespace, text],
                    entity_from_row,
                )
                .optional()?;
            Ok(entity)
        })
    }

    /// Keyword search over fact values and properties, for rank fusion
    pub fn search_facts_keyword(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Fact, f64)>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            return Ok(vec![]);
        }

        let now = Utc::now().to_rfc3339();
        let facts = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_id, property, value, confidence, valid_from,
                        valid_until, source_conversation, contradicts, is_archived, namespace
                 FROM facts
                 WHERE namespace = ?1 AND is_archived = 0
                   AND (valid_until IS NULL OR valid_until > ?2)",
            )?;
            let facts = stmt
                .query_map(params![namespace, now], fact_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(facts)
        })?;

        let mut scored: Vec<(Fact, f64)> = facts
            .into_iter()
            .filter_map(|fact| {
                let text = format!("{} {}", fact.property, fact.value).to_lowercase();
                let matches = tokens.iter().filter(|t| text.contains(t.as_str())).count();
                if matches == 0 {
                    return None;
                }
                let score = matches as f64 / tokens.len() as f64;
                Some((fact, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Aggregate row counts for one namespace
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    pub entities: i64,
    pub relationships: i64,
    pub facts: i64,
    pub conflicts: i64,
}

struct Frame {
    entity: Entity,
    score: f64,
    depth: usize,
    path: Vec<String>,
    last_relation: String,
}

struct Walk {
    entities: Vec<ScoredEntity>,
    paths: Vec<TraversalPath>,
}

impl Walk {
    fn score_of(&self, id: Option<&String>) -> f64 {
        let Some(id) = id else { return 0.0 };
        self.entities
            .iter()
            .find(|s| &s.entity.id == id)
            .map(|s| s.score)
            .unwrap_or(0.0)
    }

    fn name_of(&self, id: &str) -> Option<String> {
        self.entities
            .iter()
            .find(|s| s.entity.id == id)
            .map(|s| s.entity.name.clone())
    }
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let type_str: String = row.get(2)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: EntityType::parse_name(&type_str).unwrap_or_default(),
        description: row.get(3)?,
        confidence: row.get(4)?,
        created_at: row.get(5)?,
        last_accessed: row.get(6)?,
        access_count: row.get(7)?,
        is_archived: row.get::<_, i64>(8)? != 0,
        namespace: row.get(9)?,
    })
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let evidence_json: String = row.get(5)?;
    Ok(Relationship {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation_type: row.get(3)?,
        strength: row.get(4)?,
        evidence: serde_json::from_str(&evidence_json).unwrap_or_default(),
        created_at: row.get(6)?,
        last_reinforced: row.get(7)?,
        access_count: row.get(8)?,
        is_archived: row.get::<_, i64>(9)? != 0,
        namespace: row.get(10)?,
        decay_factor: row.get(11)?,
    })
}

pub(crate) fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<Fact> {
    let contradicts_json: String = row.get(8)?;
    Ok(Fact {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        property: row.get(2)?,
        value: row.get(3)?,
        confidence: row.get(4)?,
        valid_from: row.get(5)?,
        valid_until: row.get(6)?,
        source_conversation: row.get(7)?,
        contradicts: serde_json::from_str(&contradicts_json).unwrap_or_default(),
        is_archived: row.get::<_, i64>(9)? != 0,
        namespace: row.get(10)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
