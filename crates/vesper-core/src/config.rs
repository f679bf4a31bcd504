//! Engine configuration
//!
//! Storage root, backing-store knobs, scheduler time, rate-limit tier, and
//! retention windows. Directories are created on first use with owner-only
//! permissions; paths pointing at system directories or the bare home root
//! are warned against.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VesperError};

/// Default working-memory capacity (conversations kept newest-first)
pub const DEFAULT_MAX_CONVERSATIONS: usize = 5;

/// Default conversation TTL (7 days)
pub const DEFAULT_CONVERSATION_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default TTL for cached full-skill payloads
pub const DEFAULT_SKILL_CACHE_TTL_SECS: u64 = 3600;

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Default deadline for external calls (embedder, backing stores)
pub const DEFAULT_DEADLINE_SECS: u64 = 5;

/// Rate-limit tier of the calling agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    #[default]
    Standard,
    Premium,
    Unlimited,
}

impl RateTier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RateTier::Standard => "standard",
            RateTier::Premium => "premium",
            RateTier::Unlimited => "unlimited",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(RateTier::Standard),
            "premium" => Some(RateTier::Premium),
            "unlimited" => Some(RateTier::Unlimited),
            _ => None,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VesperConfig {
    /// Storage root; `~/.vesper` when unset
    pub storage_root: Option<PathBuf>,
    /// Consolidation hour (local wall clock)
    pub schedule_hour: u32,
    /// Consolidation minute
    pub schedule_minute: u32,
    /// Working-memory capacity
    pub max_conversations: usize,
    /// Conversation TTL in seconds
    pub conversation_ttl_secs: u64,
    /// Full-skill cache TTL in seconds
    pub skill_cache_ttl_secs: u64,
    /// Embedding dimension D; every stored blob must be exactly `D * 4` bytes
    pub embedding_dimensions: usize,
    /// Default rate tier for agents without an explicit assignment
    pub default_tier: RateTier,
    /// Deny requests when the rate-limit backing store is unreachable
    pub fail_closed: bool,
    /// Deadline for external calls in seconds
    pub deadline_secs: u64,
    /// Backup metadata retention in days
    pub backup_retention_days: i64,
}

impl Default for VesperConfig {
    fn default() -> Self {
        Self {
            storage_root: None,
            schedule_hour: 3,
            schedule_minute: 0,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            conversation_ttl_secs: DEFAULT_CONVERSATION_TTL_SECS,
            skill_cache_ttl_secs: DEFAULT_SKILL_CACHE_TTL_SECS,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            default_tier: RateTier::Standard,
            fail_closed: true,
            deadline_secs: DEFAULT_DEADLINE_SECS,
            backup_retention_days: 7,
        }
    }
}

impl VesperConfig {
    /// Resolve the storage root, creating it with restrictive permissions.
    ///
    /// Falls back to `~/.vesper` via the platform home directory when no
    /// explicit root is configured.
    pub fn resolve_storage_root(&self) -> Result<PathBuf> {
        let root = match &self.storage_root {
            Some(p) => p.clone(),
            None => {
                let base = directories::BaseDirs::new().ok_or_else(|| {
                    VesperError::Init("Could not determine home directory".to_string())
                })?;
                base.home_dir().join(".vesper")
            }
        };

        if is_risky_root(&root) {
            tracing::warn!(
                path = %root.display(),
                "Storage root points at a system directory or the bare home root"
            );
        }

        std::fs::create_dir_all(&root)?;
        // Restrict directory permissions to owner-only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(&root, perms);
        }

        Ok(root)
    }

    /// Path of the semantic-tier database under the storage root
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_storage_root()?.join("vesper.db"))
    }
}

/// True for paths nobody should use as a data root
fn is_risky_root(path: &Path) -> bool {
    let system_roots = ["/", "/etc", "/usr", "/bin", "/var", "/boot", "/lib"];
    if system_roots.iter().any(|r| Path::new(r) == path) {
        return true;
    }
    if let Some(base) = directories::BaseDirs::new() {
        if base.home_dir() == path {
            return true;
        }
    }
    false
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VesperConfig::default();
        assert_eq!(config.schedule_hour, 3);
        assert_eq!(config.schedule_minute, 0);
        assert_eq!(config.max_conversations, 5);
        assert_eq!(config.conversation_ttl_secs, 7 * 24 * 3600);
        assert!(config.fail_closed);
    }

    #[test]
    fn test_tier_roundtrip() {
        for tier in [RateTier::Standard, RateTier::Premium, RateTier::Unlimited] {
            assert_eq!(RateTier::parse_name(tier.as_str()), Some(tier));
        }
        assert_eq!(RateTier::parse_name("free"), None);
    }

    #[test]
    fn test_risky_roots() {
        assert!(is_risky_root(Path::new("/")));
        assert!(is_risky_root(Path::new("/etc")));
        assert!(!is_risky_root(Path::new("/tmp/vesper-data")));
    }

    #[test]
    fn test_resolve_explicit_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = VesperConfig {
            storage_root: Some(dir.path().join("store")),
            ..Default::default()
        };
        let root = config.resolve_storage_root().unwrap();
        assert!(root.exists());
        assert!(config.database_path().unwrap().ends_with("vesper.db"));
    }
}
