//! Core data model
//!
//! Record types for the three memory tiers:
//! - Working memory conversations (owned by the cache layer)
//! - Semantic graph entities, relationships, temporal facts, and conflicts
//! - Procedural skills and skill relationships
//!
//! Every cross-tier reference is by id; no record holds a direct handle to
//! another store's rows.

mod conversation;
mod entity;
mod skill;

pub use conversation::{CacheStats, Conversation, MemoryType};
pub use entity::{
    Conflict, ConflictKind, ConflictSeverity, Entity, EntityType, Fact, FactChain,
    GraphNeighborhood, Relationship, ResolutionStatus, ScoredEntity, TraversalPath,
};
pub(crate) use entity::normalize_pair;
pub use skill::{
    CodeType, Skill, SkillInvocation, SkillOutcome, SkillRelationship, SkillSpec, SkillSummary,
};
