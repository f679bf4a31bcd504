//! # Vesper Core
//!
//! Multi-tier personal memory engine for conversational agents:
//!
//! - **Working memory**: last-N conversations in a TTL'd associative cache
//!   with keyword/entity/topic overlap search
//! - **Semantic graph**: entities, typed relationships with exponentially
//!   decaying strength, and temporal facts with validity windows, traversed
//!   by bounded personalized PageRank
//! - **Skill library**: procedural skills retrievable by trigger keywords,
//!   embedding similarity, RRF hybrid search, and analogical vector
//!   arithmetic over co-occurrence relationships
//! - **Consolidation**: a scheduled pipeline that promotes working memory
//!   into the graph, applies decay, flags (never resolves) conflicts, prunes
//!   weak edges, and extracts skills from repeated topics
//! - **Smart router**: a pattern-ladder classifier that dispatches each
//!   query to the cheapest tier able to answer it
//! - **Boundary contracts**: schema validation and a sliding-window
//!   rate limiter with a fail-closed policy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vesper_core::{
//!     Conversation, Database, GraphStore, HashEmbedder, MemoryCache, MemoryType,
//!     QueryRouter, SkillLibrary, VesperConfig, WorkingMemory,
//! };
//!
//! let config = VesperConfig::default();
//! let db = Arc::new(Database::open(&config.database_path()?)?);
//! let working = Arc::new(WorkingMemory::new(Arc::new(MemoryCache::new()), &config));
//! let graph = Arc::new(GraphStore::new(Arc::clone(&db)));
//! let embedder = Arc::new(HashEmbedder::new(config.embedding_dimensions));
//! let skills = Arc::new(SkillLibrary::new(db, Some(embedder), config.embedding_dimensions));
//!
//! working.put(&Conversation::new("we ship on friday", MemoryType::Episodic))?;
//!
//! let router = QueryRouter::new(working, graph, skills);
//! let response = router.retrieve("default", "when do we ship?", 5)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): bundle SQLite
//! - `embeddings`: local fastembed inference; without it the deterministic
//!   hash embedder keeps the engine fully offline

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cache;
pub mod config;
pub mod conflict;
pub mod consolidation;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod model;
pub mod ratelimit;
pub mod router;
pub mod scheduler;
pub mod search;
pub mod skills;
pub mod storage;
pub mod validate;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Data model
pub use model::{
    CacheStats, CodeType, Conflict, ConflictKind, ConflictSeverity, Conversation, Entity,
    EntityType, Fact, FactChain, GraphNeighborhood, MemoryType, Relationship, ResolutionStatus,
    ScoredEntity, Skill, SkillInvocation, SkillOutcome, SkillRelationship, SkillSpec,
    SkillSummary, TraversalPath,
};

// Errors
pub use error::{Result, VesperError};

// Configuration
pub use config::{RateTier, VesperConfig};

// Tiers
pub use cache::{Cache, MemoryCache, SkillCacheEntry, WorkingMemory};
pub use graph::{GraphCounts, GraphStore, PRUNE_ACCESS_FLOOR, PRUNE_STRENGTH_FLOOR};
pub use skills::SkillLibrary;
pub use storage::Database;

// Conflict detection
pub use conflict::ConflictDetector;

// Consolidation and scheduling
pub use consolidation::{
    ConsolidationConfig, ConsolidationPipeline, ConsolidationRecord, ConsolidationStats,
};
pub use scheduler::{
    millis_until_next, Clock, CompletionCallback, ConsolidationScheduler, SchedulerStatus,
    SystemClock,
};

// Routing
pub use router::{
    Classification, QueryClass, QueryClassifier, QueryRouter, RoutedResponse, RoutedResult,
};

// Boundary contracts
pub use ratelimit::{quota, Operation, RateLimitDecision, RateLimiter, WINDOW_SECS};
pub use validate::{
    validate_content, validate_max_results, validate_memory_type, validate_metadata,
    validate_namespace, validate_query, validate_skill_id, validate_vector,
};

// Embeddings
pub use embeddings::{cosine_similarity, Embedder, Embedding, HashEmbedder};

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub use embeddings::LocalEmbedder;

// Rank fusion
pub use search::{reciprocal_rank_fusion, RRF_K};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Cache, ConsolidationPipeline, ConsolidationScheduler, ConsolidationStats, Conversation,
        Database, Embedder, EntityType, GraphStore, HashEmbedder, MemoryCache, MemoryType,
        QueryRouter, RateLimiter, Result, SkillLibrary, SkillSpec, VesperConfig, VesperError,
        WorkingMemory,
    };
}
