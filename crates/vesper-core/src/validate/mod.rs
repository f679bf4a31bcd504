//! Input validation (the C8 boundary contract)
//!
//! Every inbound operation payload is validated before it reaches the core.
//! Violations surface as `Validation` errors carrying the offending field
//! name, so the tool layer can report field-level detail.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, VesperError};
use crate::model::MemoryType;

/// Maximum stored content length in characters
pub const MAX_CONTENT_CHARS: usize = 100_000;

/// Maximum query length in characters
pub const MAX_QUERY_CHARS: usize = 10_000;

/// Maximum metadata keys
pub const MAX_METADATA_KEYS: usize = 50;

/// Maximum serialized metadata size in bytes
pub const MAX_METADATA_BYTES: usize = 10_000;

/// Maximum `max_results` value
pub const MAX_RESULTS_CAP: u64 = 100;

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,99}$").expect("namespace pattern is valid")
});

static SKILL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^skill_[a-z0-9_]+$").expect("skill id pattern is valid"));

/// Content: 1 to 100 000 characters
pub fn validate_content(content: &str) -> Result<()> {
    let chars = content.chars().count();
    if chars == 0 {
        return Err(VesperError::validation("content", "must not be empty"));
    }
    if chars > MAX_CONTENT_CHARS {
        return Err(VesperError::validation(
            "content",
            format!("exceeds {MAX_CONTENT_CHARS} characters (got {chars})"),
        ));
    }
    Ok(())
}

/// Query: 1 to 10 000 characters
pub fn validate_query(query: &str) -> Result<()> {
    let chars = query.chars().count();
    if chars == 0 {
        return Err(VesperError::validation("query", "must not be empty"));
    }
    if chars > MAX_QUERY_CHARS {
        return Err(VesperError::validation(
            "query",
            format!("exceeds {MAX_QUERY_CHARS} characters (got {chars})"),
        ));
    }
    Ok(())
}

/// Metadata: at most 50 keys and 10 000 serialized bytes
pub fn validate_metadata(metadata: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(VesperError::validation(
            "metadata",
            format!("exceeds {MAX_METADATA_KEYS} keys (got {})", metadata.len()),
        ));
    }
    let serialized = serde_json::to_vec(metadata)
        .map_err(|e| VesperError::validation("metadata", format!("not serializable: {e}")))?;
    if serialized.len() > MAX_METADATA_BYTES {
        return Err(VesperError::validation(
            "metadata",
            format!(
                "exceeds {MAX_METADATA_BYTES} serialized bytes (got {})",
                serialized.len()
            ),
        ));
    }
    Ok(())
}

/// `max_results`: integer 1 to 100
pub fn validate_max_results(max_results: u64) -> Result<usize> {
    if max_results == 0 || max_results > MAX_RESULTS_CAP {
        return Err(VesperError::validation(
            "max_results",
            format!("must be between 1 and {MAX_RESULTS_CAP} (got {max_results})"),
        ));
    }
    Ok(max_results as usize)
}

/// Memory type: one of episodic, semantic, procedural, decision
pub fn validate_memory_type(memory_type: &str) -> Result<MemoryType> {
    MemoryType::parse_name(memory_type).ok_or_else(|| {
        VesperError::validation(
            "memory_type",
            format!("unknown memory type '{memory_type}'"),
        )
    })
}

/// Namespace: `^[A-Za-z][A-Za-z0-9_-]{0,99}$`, defaulting to "default"
pub fn validate_namespace(namespace: Option<&str>) -> Result<String> {
    let namespace = match namespace {
        None | Some("") => return Ok("default".to_string()),
        Some(ns) => ns,
    };
    if !NAMESPACE_RE.is_match(namespace) {
        return Err(VesperError::validation(
            "namespace",
            format!("'{namespace}' does not match the namespace format"),
        ));
    }
    Ok(namespace.to_string())
}

/// Skill id: `^skill_[a-z0-9_]+$`
pub fn validate_skill_id(skill_id: &str) -> Result<()> {
    if !SKILL_ID_RE.is_match(skill_id) {
        return Err(VesperError::validation(
            "skill_id",
            format!("'{skill_id}' does not match the skill id format"),
        ));
    }
    Ok(())
}

/// Vectors must contain only finite numbers
pub fn validate_vector(vector: &[f32]) -> Result<()> {
    if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
        return Err(VesperError::validation(
            "vector",
            format!("non-finite value at index {position}"),
        ));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn is_validation(result: Result<()>) -> bool {
        matches!(result, Err(VesperError::Validation { .. }))
    }

    #[test]
    fn test_content_boundaries() {
        assert!(validate_content("x").is_ok());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_CHARS)).is_ok());
        assert!(is_validation(validate_content("")));
        assert!(is_validation(validate_content(
            &"x".repeat(MAX_CONTENT_CHARS + 1)
        )));
    }

    #[test]
    fn test_query_boundaries() {
        assert!(validate_query("q").is_ok());
        assert!(validate_query(&"q".repeat(MAX_QUERY_CHARS)).is_ok());
        assert!(is_validation(validate_query("")));
        assert!(is_validation(validate_query(&"q".repeat(MAX_QUERY_CHARS + 1))));
    }

    #[test]
    fn test_max_results_boundaries() {
        assert!(matches!(validate_max_results(1), Ok(1)));
        assert!(matches!(validate_max_results(100), Ok(100)));
        assert!(validate_max_results(0).is_err());
        assert!(validate_max_results(101).is_err());
    }

    #[test]
    fn test_metadata_limits() {
        let mut small = serde_json::Map::new();
        small.insert("k".to_string(), serde_json::json!("v"));
        assert!(validate_metadata(&small).is_ok());

        let mut too_many = serde_json::Map::new();
        for i in 0..=MAX_METADATA_KEYS {
            too_many.insert(format!("k{i}"), serde_json::json!(i));
        }
        assert!(validate_metadata(&too_many).is_err());

        let mut too_big = serde_json::Map::new();
        too_big.insert("blob".to_string(), serde_json::json!("x".repeat(11_000)));
        assert!(validate_metadata(&too_big).is_err());
    }

    #[test]
    fn test_memory_type_values() {
        for valid in ["episodic", "semantic", "procedural", "decision"] {
            assert!(validate_memory_type(valid).is_ok());
        }
        assert!(validate_memory_type("working").is_err());
    }

    #[test]
    fn test_namespace_format() {
        assert_eq!(validate_namespace(None).unwrap(), "default");
        assert_eq!(validate_namespace(Some("")).unwrap(), "default");
        assert_eq!(validate_namespace(Some("team-a_1")).unwrap(), "team-a_1");
        assert!(validate_namespace(Some("9starts-with-digit")).is_err());
        assert!(validate_namespace(Some("has space")).is_err());
        assert!(validate_namespace(Some(&"a".repeat(101))).is_err());
    }

    #[test]
    fn test_skill_id_format() {
        assert!(validate_skill_id("skill_sort_list").is_ok());
        assert!(validate_skill_id("skill_").is_err());
        assert!(validate_skill_id("sort_list").is_err());
        assert!(validate_skill_id("skill_Sort").is_err());
    }

    #[test]
    fn test_vector_finiteness() {
        assert!(validate_vector(&[0.0, 1.5, -2.0]).is_ok());
        assert!(validate_vector(&[0.0, f32::NAN]).is_err());
        assert!(validate_vector(&[f32::INFINITY]).is_err());
    }
}
