//! Conversation - the unit of working memory
//!
//! Conversations are owned exclusively by the working-memory cache: created
//! on ingest, read by the router and the consolidation pipeline, destroyed by
//! LRU eviction or TTL expiry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// Classification of an ingested memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// What happened - events, conversations, specific moments
    #[default]
    Episodic,
    /// What is known - facts, concepts, generalizations
    Semantic,
    /// How-to knowledge - skills, procedures
    Procedural,
    /// A recorded decision; decays at a quarter of the normal rate
    Decision,
}

impl MemoryType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::Decision => "decision",
        }
    }

    /// Parse from string name; unknown names are rejected at the validation
    /// boundary, so this only sees the four canonical values.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "episodic" => Some(MemoryType::Episodic),
            "semantic" => Some(MemoryType::Semantic),
            "procedural" => Some(MemoryType::Procedural),
            "decision" => Some(MemoryType::Decision),
            _ => None,
        }
    }

    /// Relationship decay factor for knowledge extracted from this memory.
    /// Decisions decay at a quarter of the normal rate.
    pub fn decay_factor(&self) -> f64 {
        match self {
            MemoryType::Decision => 0.25,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONVERSATION
// ============================================================================

/// A conversation fragment held in working memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier (UUID v4, generated by the engine)
    pub conversation_id: String,
    /// When the conversation was ingested
    pub timestamp: DateTime<Utc>,
    /// Raw conversation text
    pub full_text: String,
    /// Memory classification from ingest
    pub memory_type: MemoryType,
    /// Optional embedding of the full text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Entities mentioned in the conversation
    #[serde(default)]
    pub key_entities: BTreeSet<String>,
    /// Topics covered by the conversation
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// Shallow intent label ("store", "ask", "decide", ...)
    #[serde(default)]
    pub user_intent: String,
    /// Open metadata record; validated at the boundary, opaque here
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Namespace the conversation belongs to
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Agent that stored the conversation, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Task the conversation belongs to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Conversation {
    /// Create a new conversation with a generated id and current timestamp
    pub fn new(full_text: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            full_text: full_text.into(),
            memory_type,
            embedding: None,
            key_entities: BTreeSet::new(),
            topics: BTreeSet::new(),
            user_intent: String::new(),
            metadata: serde_json::Map::new(),
            namespace: default_namespace(),
            agent_id: None,
            task_id: None,
        }
    }

    /// Word-overlap similarity against a query: `matches / |query_words|`.
    /// The query is lowercased and split on whitespace.
    pub fn text_similarity(&self, query: &str) -> f64 {
        let query_words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if query_words.is_empty() {
            return 0.0;
        }
        let text = self.full_text.to_lowercase();
        let matches = query_words.iter().filter(|w| text.contains(w.as_str())).count();
        matches as f64 / query_words.len() as f64
    }

    /// Set-overlap similarity for entity queries: `|overlap| / |query_set|`
    pub fn entity_overlap(&self, entities: &BTreeSet<String>) -> f64 {
        set_overlap(&self.key_entities, entities)
    }

    /// Set-overlap similarity for topic queries: `|overlap| / |query_set|`
    pub fn topic_overlap(&self, topics: &BTreeSet<String>) -> f64 {
        set_overlap(&self.topics, topics)
    }

    /// Approximate serialized size in bytes
    pub fn approximate_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

fn set_overlap(have: &BTreeSet<String>, want: &BTreeSet<String>) -> f64 {
    if want.is_empty() {
        return 0.0;
    }
    let overlap = want
        .iter()
        .filter(|w| have.contains(w.to_lowercase().as_str()) || have.contains(w.as_str()))
        .count();
    overlap as f64 / want.len() as f64
}

// ============================================================================
// CACHE STATS
// ============================================================================

/// Aggregate statistics for the working-memory tier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of conversations currently cached
    pub count: usize,
    /// Timestamp of the oldest cached conversation
    pub oldest: Option<DateTime<Utc>>,
    /// Timestamp of the newest cached conversation
    pub newest: Option<DateTime<Utc>>,
    /// Approximate total payload size in bytes
    pub total_bytes: usize,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_roundtrip() {
        for mt in [
            MemoryType::Episodic,
            MemoryType::Semantic,
            MemoryType::Procedural,
            MemoryType::Decision,
        ] {
            assert_eq!(MemoryType::parse_name(mt.as_str()), Some(mt));
        }
        assert_eq!(MemoryType::parse_name("working"), None);
    }

    #[test]
    fn test_decision_decay_factor() {
        assert_eq!(MemoryType::Decision.decay_factor(), 0.25);
        assert_eq!(MemoryType::Semantic.decay_factor(), 1.0);
    }

    #[test]
    fn test_text_similarity() {
        let conv = Conversation::new(
            "The user prefers TypeScript over JavaScript",
            MemoryType::Semantic,
        );

        // All three query words appear
        assert!((conv.text_similarity("user prefers typescript") - 1.0).abs() < f64::EPSILON);

        // One of two words appears
        assert!((conv.text_similarity("typescript rust") - 0.5).abs() < f64::EPSILON);

        // Empty query scores zero
        assert_eq!(conv.text_similarity(""), 0.0);
    }

    #[test]
    fn test_entity_overlap() {
        let mut conv = Conversation::new("x", MemoryType::Episodic);
        conv.key_entities.insert("vesper".to_string());
        conv.key_entities.insert("mcp".to_string());

        let query: BTreeSet<String> = ["vesper".to_string(), "redis".to_string()].into();
        assert!((conv.entity_overlap(&query) - 0.5).abs() < f64::EPSILON);

        let empty = BTreeSet::new();
        assert_eq!(conv.entity_overlap(&empty), 0.0);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Conversation::new("a", MemoryType::Episodic);
        let b = Conversation::new("b", MemoryType::Episodic);
        assert_ne!(a.conversation_id, b.conversation_id);
    }
}
