//! Working memory - last-N conversations plus the skill sub-tier
//!
//! Key layout (all keys namespaced):
//!
//! ```text
//! {ns}:working:conv:{id}     conversation payload, TTL 7d
//! {ns}:working:recent        recency index, newest first
//! {ns}:working:pending       ids awaiting consolidation
//! {ns}:working:skill:{id}    cached FullSkill payload, TTL 1h
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Cache;
use crate::config::VesperConfig;
use crate::error::{Result, VesperError};
use crate::model::{CacheStats, Conversation, Skill};

/// Minimum text-overlap score for `search_text` results
const TEXT_SCORE_FLOOR: f64 = 0.3;

/// Batch size for bounded keyspace sweeps in `clear`
const CLEAR_BATCH: usize = 64;

/// A cached full-skill payload with its hit counter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCacheEntry {
    /// The cached skill
    pub skill: Skill,
    /// Hits since the entry was cached
    pub access_count: u64,
}

/// The working-memory tier (C1)
pub struct WorkingMemory {
    cache: Arc<dyn Cache>,
    max_conversations: usize,
    conversation_ttl: Duration,
    skill_ttl: Duration,
}

impl WorkingMemory {
    /// Create a working-memory tier over a cache backend
    pub fn new(cache: Arc<dyn Cache>, config: &VesperConfig) -> Self {
        Self {
            cache,
            max_conversations: config.max_conversations,
            conversation_ttl: Duration::from_secs(config.conversation_ttl_secs),
            skill_ttl: Duration::from_secs(config.skill_cache_ttl_secs),
        }
    }

    fn conv_key(namespace: &str, id: &str) -> String {
        format!("{namespace}:working:conv:{id}")
    }

    fn conv_prefix(namespace: &str) -> String {
        format!("{namespace}:working:conv:")
    }

    fn recent_key(namespace: &str) -> String {
        format!("{namespace}:working:recent")
    }

    fn pending_key(namespace: &str) -> String {
        format!("{namespace}:working:pending")
    }

    fn skill_key(namespace: &str, skill_id: &str) -> String {
        format!("{namespace}:working:skill:{skill_id}")
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Store a conversation and push it to the front of the recency index.
    /// Conversations beyond the configured capacity are evicted in the same
    /// pipelined step; their ids are returned.
    pub fn put(&self, conversation: &Conversation) -> Result<Vec<String>> {
        let ns = &conversation.namespace;
        let payload = serde_json::to_vec(conversation)
            .map_err(|e| VesperError::Integrity(format!("Conversation encode failed: {e}")))?;

        let evicted = self.cache.put_indexed(
            &Self::conv_key(ns, &conversation.conversation_id),
            &payload,
            Some(self.conversation_ttl),
            &Self::recent_key(ns),
            &conversation.conversation_id,
            &Self::conv_prefix(ns),
            self.max_conversations,
        )?;

        if !evicted.is_empty() {
            tracing::debug!(
                namespace = %ns,
                evicted = evicted.len(),
                "Working memory evicted conversations beyond capacity"
            );
        }
        Ok(evicted)
    }

    /// Fetch a conversation by id
    pub fn get(&self, namespace: &str, id: &str) -> Result<Option<Conversation>> {
        match self.cache.get(&Self::conv_key(namespace, id))? {
            Some(bytes) => {
                let conv = serde_json::from_slice(&bytes)
                    .map_err(|e| VesperError::Integrity(format!("Conversation decode failed: {e}")))?;
                Ok(Some(conv))
            }
            None => Ok(None),
        }
    }

    /// Most recent conversations, newest first
    pub fn list_recent(&self, namespace: &str, limit: usize) -> Result<Vec<Conversation>> {
        let ids = self.cache.list_range(&Self::recent_key(namespace), limit)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            // TTL expiry can outrun the index; skip holes
            if let Some(conv) = self.get(namespace, &id)? {
                out.push(conv);
            }
        }
        Ok(out)
    }

    /// Word-overlap text search over recent conversations.
    /// Returns results scoring above 0.3, sorted descending, up to `k`.
    pub fn search_text(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Conversation, f64)>> {
        let scored = self
            .list_recent(namespace, self.max_conversations)?
            .into_iter()
            .map(|c| {
                let score = c.text_similarity(query);
                (c, score)
            })
            .filter(|(_, score)| *score > TEXT_SCORE_FLOOR);
        Ok(top_k(scored, k))
    }

    /// Entity-overlap search: `|overlap| / |query_set|`
    pub fn search_entities(
        &self,
        namespace: &str,
        entities: &BTreeSet<String>,
        k: usize,
    ) -> Result<Vec<(Conversation, f64)>> {
        let scored = self
            .list_recent(namespace, self.max_conversations)?
            .into_iter()
            .map(|c| {
                let score = c.entity_overlap(entities);
                (c, score)
            })
            .filter(|(_, score)| *score > 0.0);
        Ok(top_k(scored, k))
    }

    /// Topic-overlap search: `|overlap| / |query_set|`
    pub fn search_topics(
        &self,
        namespace: &str,
        topics: &BTreeSet<String>,
        k: usize,
    ) -> Result<Vec<(Conversation, f64)>> {
        let scored = self
            .list_recent(namespace, self.max_conversations)?
            .into_iter()
            .map(|c| {
                let score = c.topic_overlap(topics);
                (c, score)
            })
            .filter(|(_, score)| *score > 0.0);
        Ok(top_k(scored, k))
    }

    /// Delete a conversation from both the store and the recency index
    pub fn delete(&self, namespace: &str, id: &str) -> Result<bool> {
        let existed = self.cache.delete(&Self::conv_key(namespace, id))?;
        self.cache.list_remove(&Self::recent_key(namespace), id)?;
        Ok(existed)
    }

    /// Aggregate statistics for a namespace
    pub fn stats(&self, namespace: &str) -> Result<CacheStats> {
        let conversations = self.list_recent(namespace, self.max_conversations)?;
        let mut stats = CacheStats {
            count: conversations.len(),
            ..Default::default()
        };
        for conv in &conversations {
            stats.total_bytes += conv.approximate_bytes();
            if stats.oldest.map(|t| conv.timestamp < t).unwrap_or(true) {
                stats.oldest = Some(conv.timestamp);
            }
            if stats.newest.map(|t| conv.timestamp > t).unwrap_or(true) {
                stats.newest = Some(conv.timestamp);
            }
        }
        Ok(stats)
    }

    /// Drop every working-memory key in a namespace, sweeping the keyspace
    /// in bounded batches rather than all at once.
    pub fn clear(&self, namespace: &str) -> Result<usize> {
        let prefix = format!("{namespace}:working:");
        let mut removed = 0;
        let mut cursor = String::new();
        loop {
            let keys = self.cache.scan_prefix(&prefix, &cursor, CLEAR_BATCH)?;
            let Some(last) = keys.last().cloned() else {
                break;
            };
            for key in &keys {
                if self.cache.delete(key)? {
                    removed += 1;
                }
            }
            cursor = last;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Pending ingest queue
    // ------------------------------------------------------------------

    /// Append a conversation id to the consolidation queue
    pub fn push_pending(&self, namespace: &str, id: &str) -> Result<()> {
        self.cache
            .list_push_back(&Self::pending_key(namespace), id)
    }

    /// Drain up to `limit` pending conversation ids
    pub fn drain_pending(&self, namespace: &str, limit: usize) -> Result<Vec<String>> {
        self.cache.list_pop_front(&Self::pending_key(namespace), limit)
    }

    // ------------------------------------------------------------------
    // Skill sub-tier
    // ------------------------------------------------------------------

    /// Cache a full skill payload for fast re-loading
    pub fn cache_skill(&self, namespace: &str, skill: &Skill) -> Result<()> {
        let entry = SkillCacheEntry {
            skill: skill.clone(),
            access_count: 0,
        };
        let payload = serde_json::to_vec(&entry)
            .map_err(|e| VesperError::Integrity(format!("Skill encode failed: {e}")))?;
        self.cache.set(
            &Self::skill_key(namespace, &skill.id),
            &payload,
            Some(self.skill_ttl),
        )
    }

    /// Fetch a cached skill. Each hit increments the entry's access counter
    /// and re-persists it with the unchanged TTL.
    pub fn get_cached_skill(&self, namespace: &str, skill_id: &str) -> Result<Option<Skill>> {
        let key = Self::skill_key(namespace, skill_id);
        let Some(bytes) = self.cache.get(&key)? else {
            return Ok(None);
        };
        let mut entry: SkillCacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| VesperError::Integrity(format!("Skill decode failed: {e}")))?;
        entry.access_count += 1;

        let payload = serde_json::to_vec(&entry)
            .map_err(|e| VesperError::Integrity(format!("Skill encode failed: {e}")))?;
        self.cache.set(&key, &payload, Some(self.skill_ttl))?;

        Ok(Some(entry.skill))
    }

    /// Namespaces that currently hold working-memory keys
    pub fn namespaces(&self) -> Result<Vec<String>> {
        let mut namespaces = BTreeSet::new();
        let mut cursor = String::new();
        loop {
            let keys = self.cache.scan_prefix("", &cursor, CLEAR_BATCH)?;
            let Some(last) = keys.last().cloned() else {
                break;
            };
            for key in &keys {
                if let Some((ns, rest)) = key.split_once(':') {
                    if rest.starts_with("working:") {
                        namespaces.insert(ns.to_string());
                    }
                }
            }
            cursor = last;
        }
        Ok(namespaces.into_iter().collect())
    }
}

/// Sort scored results descending and keep the top `k`
fn top_k(scored: impl Iterator<Item = (Conversation, f64)>, k: usize) -> Vec<(Conversation, f64)> {
    let mut results: Vec<(Conversation, f64)> = scored.collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(k);
    results
}

// ============================================================================
// TESTS
// ============================================================================
