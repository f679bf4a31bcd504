//! Error taxonomy for the memory engine.
//!
//! Kinds, not types: every fallible operation in the crate returns
//! [`VesperError`]. Foreground callers map these to structured results at the
//! operation boundary; the consolidation pipeline aggregates them into its
//! stats record; the scheduler reports them through its completion callback.

/// Engine-wide error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VesperError {
    /// Schema violation, size limit, or malformed field on an inbound payload.
    /// Carries the offending field name for field-level reporting.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// Name of the field that failed validation
        field: String,
        /// Human-readable reason
        message: String,
    },

    /// Quota exceeded or fail-closed trip. Carries the retry hint in seconds.
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the caller should wait before retrying
        retry_after_secs: u64,
        /// Window quota that was exceeded
        limit: u32,
        /// Requests remaining in the window (0 when denied)
        remaining: u32,
        /// Unix timestamp at which the window resets
        reset_at: i64,
    },

    /// Unknown id on an operation that requires the record to exist
    /// (`delete_memory`, `load_skill`). Plain lookups return `Ok(None)`.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store-level corruption: mis-sized embedding blob, broken referential
    /// key, self-relationship. Aborts the single operation, store stays
    /// consistent.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Embedder, cache, or graph store unreachable or timed out. Retryable;
    /// the router degrades the affected branch to an empty result.
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl VesperError {
    /// Build a validation error for a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors the caller may retry after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VesperError::RateLimited { .. } | VesperError::Upstream(_)
        )
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, VesperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_carries_field() {
        let err = VesperError::validation("content", "too long");
        match err {
            VesperError::Validation { field, message } => {
                assert_eq!(field, "content");
                assert_eq!(message, "too long");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(VesperError::Upstream("cache down".into()).is_retryable());
        assert!(
            VesperError::RateLimited {
                retry_after_secs: 30,
                limit: 100,
                remaining: 0,
                reset_at: 0,
            }
            .is_retryable()
        );
        assert!(!VesperError::NotFound("x".into()).is_retryable());
        assert!(!VesperError::validation("q", "empty").is_retryable());
    }
}
