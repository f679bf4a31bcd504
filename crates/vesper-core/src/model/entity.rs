//! Semantic graph records - entities, relationships, temporal facts, conflicts
//!
//! Invariants enforced by the graph store:
//! - `(name, type)` is unique per namespace for entities
//! - `source_id != target_id` and `(source, target, relation_type)` unique
//!   for relationships; both endpoints must exist; entity deletion cascades
//! - `(entity_id, property, value, valid_from)` unique for facts
//! - `fact_id_1 < fact_id_2` for conflicts (normalized pair order)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITY
// ============================================================================

/// Types of semantic entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A person the agent knows about
    Person,
    /// A project being worked on
    Project,
    /// An abstract concept or tool
    #[default]
    Concept,
    /// A stated user preference
    Preference,
}

impl EntityType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Project => "project",
            EntityType::Concept => "concept",
            EntityType::Preference => "preference",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "person" => Some(EntityType::Person),
            "project" => Some(EntityType::Project),
            "concept" => Some(EntityType::Concept),
            "preference" => Some(EntityType::Preference),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entity in the semantic graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Display name; `(name, type)` is unique per namespace
    pub name: String,
    /// Entity classification
    pub entity_type: EntityType,
    /// Optional free-text description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Confidence in the entity's existence, lowered when facts conflict
    pub confidence: f64,
    /// When the entity was first seen
    pub created_at: DateTime<Utc>,
    /// When the entity was last read or reinforced
    pub last_accessed: DateTime<Utc>,
    /// Number of reads and reinforcements
    pub access_count: i64,
    /// Archived entities are retained but excluded from queries
    pub is_archived: bool,
    /// Namespace the entity belongs to
    pub namespace: String,
}

// ============================================================================
// RELATIONSHIP
// ============================================================================

/// A typed, weighted edge between two entities
///
/// Strength decays exponentially with time since the last reinforcement:
/// `strength' = strength * exp(-days / (30 / decay_factor))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Source entity id
    pub source_id: String,
    /// Target entity id; never equal to `source_id`
    pub target_id: String,
    /// Edge label ("uses", "works_with", "means", ...)
    pub relation_type: String,
    /// Edge weight in [0, 1]
    pub strength: f64,
    /// Conversations that evidenced this relationship
    #[serde(default)]
    pub evidence: Vec<String>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
    /// Last time the edge was reinforced by an upsert
    pub last_reinforced: DateTime<Utc>,
    /// Number of traversals through this edge
    pub access_count: i64,
    /// Archived edges are retained but excluded from traversal
    pub is_archived: bool,
    /// Decay rate multiplier; 1.0 normal, 0.25 for decision-derived edges
    pub decay_factor: f64,
    /// Namespace the relationship belongs to
    pub namespace: String,
}

// ============================================================================
// FACT
// ============================================================================

/// A temporal fact about an entity
///
/// `valid_until = None` means currently true. Facts move
/// active -> superseded (validity closed) -> archived; they are never
/// silently replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Entity the fact is about
    pub entity_id: String,
    /// Property name ("language", "status", ...)
    pub property: String,
    /// Property value
    pub value: String,
    /// Confidence in [0, 1]; set to 0.5 when a conflict references the fact
    pub confidence: f64,
    /// Start of the validity window
    pub valid_from: DateTime<Utc>,
    /// End of the validity window; `None` while currently true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Conversation the fact was extracted from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_conversation: Option<String>,
    /// Ids of facts this one contradicts
    #[serde(default)]
    pub contradicts: Vec<String>,
    /// Archived facts are never returned
    pub is_archived: bool,
    /// Namespace the fact belongs to
    pub namespace: String,
}

impl Fact {
    /// True while the validity window is open at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_archived && self.valid_until.map(|t| t > now).unwrap_or(true)
    }
}

// ============================================================================
// CONFLICT
// ============================================================================

/// Kind of detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same property, different values, overlapping validity windows
    TemporalOverlap,
    /// Same property and valid_from, different values, both open
    Contradiction,
    /// Two preference entities with the same description, >7 days apart
    PreferenceShift,
}

impl ConflictKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::TemporalOverlap => "temporal_overlap",
            ConflictKind::Contradiction => "contradiction",
            ConflictKind::PreferenceShift => "preference_shift",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "temporal_overlap" => Some(ConflictKind::TemporalOverlap),
            "contradiction" => Some(ConflictKind::Contradiction),
            "preference_shift" => Some(ConflictKind::PreferenceShift),
            _ => None,
        }
    }
}

/// Conflict severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl ConflictSeverity {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "low" => Some(ConflictSeverity::Low),
            "medium" => Some(ConflictSeverity::Medium),
            "high" => Some(ConflictSeverity::High),
            _ => None,
        }
    }
}

/// Resolution lifecycle of a conflict; conflicts are never auto-resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    #[default]
    Flagged,
    Acknowledged,
    Resolved,
}

impl ResolutionStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Flagged => "flagged",
            ResolutionStatus::Acknowledged => "acknowledged",
            ResolutionStatus::Resolved => "resolved",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "flagged" => Some(ResolutionStatus::Flagged),
            "acknowledged" => Some(ResolutionStatus::Acknowledged),
            "resolved" => Some(ResolutionStatus::Resolved),
            _ => None,
        }
    }
}

/// A recorded conflict between two facts (or preference entities)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Unique identifier (`conf_` + UUID v4)
    pub id: String,
    /// First fact id; always lexicographically less than `fact_id_2`
    pub fact_id_1: String,
    /// Second fact id
    pub fact_id_2: String,
    /// Entity both facts concern
    pub entity_id: String,
    /// Conflicting property, when the conflict is fact-level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Conflict classification
    pub kind: ConflictKind,
    /// Human-readable description of the disagreement
    pub description: String,
    /// Severity assigned by the detection pass
    pub severity: ConflictSeverity,
    /// Resolution lifecycle state
    pub resolution_status: ResolutionStatus,
    /// Free-text resolution provided by the user, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_resolution: Option<String>,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
    /// Namespace the conflict belongs to
    pub namespace: String,
}

/// Normalize a pair of fact ids into `(lesser, greater)` order
pub(crate) fn normalize_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a < b { (a, b) } else { (b, a) }
}

// ============================================================================
// TRAVERSAL RESULTS
// ============================================================================

/// An entity with its propagated traversal score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEntity {
    /// The visited entity
    pub entity: Entity,
    /// Propagated score: product of edge strengths and the damping factor
    pub score: f64,
}

/// Path taken to reach an entity during fact-collecting traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalPath {
    /// Entity ids from the root to the visited entity, in order
    pub entity_ids: Vec<String>,
    /// Relation type of the last hop
    pub last_relation: String,
}

/// A multi-hop chain (path length > 2) with intermediary names resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactChain {
    /// Entity names from the root to the terminal entity
    pub entity_names: Vec<String>,
    /// Score of the terminal entity
    pub score: f64,
}

/// Result of fact-collecting personalized PageRank
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNeighborhood {
    /// Visited entities sorted by score descending
    pub entities: Vec<ScoredEntity>,
    /// Currently-valid facts of visited entities, deduplicated by id and
    /// sorted by confidence descending
    pub facts: Vec<Fact>,
    /// Paths taken to each visited entity
    pub paths: Vec<TraversalPath>,
    /// Multi-hop chains with intermediary entity names
    pub chains: Vec<FactChain>,
}

// ============================================================================
// TESTS
// ============================================================================
