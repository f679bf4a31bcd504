//! Procedural skills and skill relationships
//!
//! A skill is a reusable procedure with trigger keywords, an optional
//! embedding, and success/failure tracking. Skill relationships carry
//! co-occurrence counts and relational vectors used for analogical search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SKILL
// ============================================================================

/// How the skill's code is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    /// Code body stored inline on the skill record
    #[default]
    Inline,
    /// `code` holds a reference (path, URL) to the body
    Reference,
}

impl CodeType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeType::Inline => "inline",
            CodeType::Reference => "reference",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(CodeType::Inline),
            "reference" => Some(CodeType::Reference),
            _ => None,
        }
    }
}

/// A procedural skill (full payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    /// Unique identifier (`skill_` prefix, lowercase snake)
    pub id: String,
    /// Unique display name
    pub name: String,
    /// Short summary used for lazy context injection (~100 chars)
    pub summary: String,
    /// Full description
    pub description: String,
    /// Category for grouping ("data", "formatting", ...)
    pub category: String,
    /// Trigger keywords matched by trigger search
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Optional code body or reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// How `code` is stored
    pub code_type: CodeType,
    /// Prerequisites described in prose
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Skills this one composes
    #[serde(default)]
    pub uses_skills: Vec<String>,
    /// Skills that compose this one
    #[serde(default)]
    pub used_by_skills: Vec<String>,
    /// Successful applications
    pub success_count: i64,
    /// Failed applications
    pub failure_count: i64,
    /// Mean user satisfaction over successes, in [0, 1]
    pub avg_user_satisfaction: f64,
    /// Optional embedding of name + summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Last time `load_full` fetched the skill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// Archived skills are excluded from search
    pub is_archived: bool,
    /// Monotonic version, bumped on edits
    pub version: i64,
    /// Namespace the skill belongs to
    pub namespace: String,
}

impl Skill {
    /// Generate a skill id from a name: `skill_` + lowercase snake name
    pub fn id_from_name(name: &str) -> String {
        let slug: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("skill_{}", slug.trim_matches('_'))
    }

    /// Namespace-scoped skill id. Ids are globally unique, so non-default
    /// namespaces fold the namespace into the slug.
    pub fn id_in_namespace(namespace: &str, name: &str) -> String {
        if namespace == "default" {
            Self::id_from_name(name)
        } else {
            Self::id_from_name(&format!("{namespace} {name}"))
        }
    }
}

/// Lightweight skill record for context injection
///
/// A summary costs roughly a tenth of the tokens of a full skill payload,
/// which is why `get_summaries` is the default retrieval surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    /// Skill id
    pub id: String,
    /// Skill name
    pub name: String,
    /// Short summary
    pub summary: String,
    /// Category
    pub category: String,
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for creating a skill
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkillSpec {
    /// Unique display name
    pub name: String,
    /// Short summary (~100 chars)
    pub summary: String,
    /// Full description
    #[serde(default)]
    pub description: String,
    /// Category
    #[serde(default)]
    pub category: String,
    /// Trigger keywords
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Optional code body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Code storage mode
    #[serde(default)]
    pub code_type: CodeType,
    /// Prerequisites in prose
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Namespace; defaults to "default"
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SkillSpec {
    /// Create a minimal spec with name and summary
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            description: String::new(),
            category: String::new(),
            triggers: vec![],
            code: None,
            code_type: CodeType::Inline,
            prerequisites: vec![],
            namespace: None,
        }
    }
}

/// Outcome reported for a skill application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillOutcome {
    Success,
    Failure,
}

/// Result of invocation detection over a raw query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInvocation {
    /// Matched skill, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<String>,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
}

// ============================================================================
// SKILL RELATIONSHIP
// ============================================================================

/// A relationship between two skills
///
/// `skill_id_1 < skill_id_2` always holds (normalized ordering), and the
/// `(skill_id_1, skill_id_2, relationship_type)` tuple is unique. The
/// relational vector is `embedding(skill_2) - embedding(skill_1)` and can be
/// recomputed at will.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRelationship {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Lesser skill id of the normalized pair
    pub skill_id_1: String,
    /// Greater skill id of the normalized pair
    pub skill_id_2: String,
    /// Relationship label ("co_occurrence", "composes", ...)
    pub relationship_type: String,
    /// Times the pair was observed together
    pub co_occurrence_count: i64,
    /// `embedding(skill_2) - embedding(skill_1)`, once computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relational_vector: Option<Vec<f32>>,
    /// When the pair was first recorded
    pub created_at: DateTime<Utc>,
    /// Last co-occurrence or vector update
    pub last_updated: DateTime<Utc>,
}

impl SkillRelationship {
    /// Create a fresh co-occurrence record for a normalized pair
    pub fn co_occurrence(skill_a: &str, skill_b: &str) -> Self {
        let (first, second) = if skill_a < skill_b {
            (skill_a, skill_b)
        } else {
            (skill_b, skill_a)
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            skill_id_1: first.to_string(),
            skill_id_2: second.to_string(),
            relationship_type: "co_occurrence".to_string(),
            co_occurrence_count: 1,
            relational_vector: None,
            created_at: now,
            last_updated: now,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_name() {
        assert_eq!(Skill::id_from_name("Sort List"), "skill_sort_list");
        assert_eq!(Skill::id_from_name("CSV -> JSON"), "skill_csv____json");
    }

    #[test]
    fn test_co_occurrence_normalizes_order() {
        let rel = SkillRelationship::co_occurrence("skill_b", "skill_a");
        assert_eq!(rel.skill_id_1, "skill_a");
        assert_eq!(rel.skill_id_2, "skill_b");
        assert_eq!(rel.co_occurrence_count, 1);
    }

    #[test]
    fn test_skill_spec_deny_unknown_fields() {
        let json = r#"{"name": "sort list", "summary": "sorts a list"}"#;
        assert!(serde_json::from_str::<SkillSpec>(json).is_ok());

        let json_bad = r#"{"name": "x", "summary": "y", "privilege": "root"}"#;
        assert!(serde_json::from_str::<SkillSpec>(json_bad).is_err());
    }

    #[test]
    fn test_code_type_roundtrip() {
        for ct in [CodeType::Inline, CodeType::Reference] {
            assert_eq!(CodeType::parse_name(ct.as_str()), Some(ct));
        }
    }
}
