//! Test fixtures
//!
//! Builds a fully wired engine over a temporary database, an in-process
//! cache, and the deterministic hash embedder so similarity assertions are
//! stable across runs. Also provides a dead cache stub for fail-closed
//! tests.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vesper_core::{
    Cache, ConsolidationConfig, ConsolidationPipeline, Conversation, Database, Embedder,
    GraphStore, HashEmbedder, MemoryCache, MemoryType, QueryRouter, Result, SkillLibrary,
    VesperConfig, VesperError, WorkingMemory,
};

/// Embedding dimension for the test corpus
pub const DIMS: usize = 64;

/// A fully wired engine over temporary storage
pub struct TestEngine {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub working: Arc<WorkingMemory>,
    pub graph: Arc<GraphStore>,
    pub skills: Arc<SkillLibrary>,
    pub router: QueryRouter,
    pub pipeline: ConsolidationPipeline,
}

impl TestEngine {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::open_in_dir(dir.path()).expect("database"));
        let working = Arc::new(WorkingMemory::new(
            Arc::new(MemoryCache::new()),
            &VesperConfig::default(),
        ));
        let graph = Arc::new(GraphStore::new(Arc::clone(&db)));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIMS));
        let skills = Arc::new(SkillLibrary::new(
            Arc::clone(&db),
            Some(embedder),
            DIMS,
        ));
        let router = QueryRouter::new(
            Arc::clone(&working),
            Arc::clone(&graph),
            Arc::clone(&skills),
        );
        let pipeline = ConsolidationPipeline::new(
            Arc::clone(&working),
            Arc::clone(&graph),
            Arc::clone(&skills),
            Arc::clone(&db),
            ConsolidationConfig::default(),
        );
        Self {
            dir,
            db,
            working,
            graph,
            skills,
            router,
            pipeline,
        }
    }

    /// Store a conversation the way the ingest tool does: into working
    /// memory plus the pending consolidation queue.
    pub fn store(
        &self,
        text: &str,
        memory_type: MemoryType,
        entities: &[&str],
        topics: &[&str],
    ) -> String {
        let mut conversation = Conversation::new(text, memory_type);
        for entity in entities {
            conversation.key_entities.insert(entity.to_lowercase());
        }
        for topic in topics {
            conversation.topics.insert(topic.to_lowercase());
        }
        let id = conversation.conversation_id.clone();
        self.working.put(&conversation).expect("put conversation");
        self.working
            .push_pending("default", &id)
            .expect("queue conversation");
        id
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache stub whose every operation fails, for fail-closed behavior
pub struct DeadCache;

fn down<T>() -> Result<T> {
    Err(VesperError::Upstream("cache unreachable".to_string()))
}

impl Cache for DeadCache {
    fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        down()
    }
    fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> Result<()> {
        down()
    }
    fn delete(&self, _: &str) -> Result<bool> {
        down()
    }
    fn put_indexed(
        &self,
        _: &str,
        _: &[u8],
        _: Option<Duration>,
        _: &str,
        _: &str,
        _: &str,
        _: usize,
    ) -> Result<Vec<String>> {
        down()
    }
    fn list_range(&self, _: &str, _: usize) -> Result<Vec<String>> {
        down()
    }
    fn list_push_back(&self, _: &str, _: &str) -> Result<()> {
        down()
    }
    fn list_pop_front(&self, _: &str, _: usize) -> Result<Vec<String>> {
        down()
    }
    fn list_remove(&self, _: &str, _: &str) -> Result<()> {
        down()
    }
    fn zadd(&self, _: &str, _: &str, _: f64) -> Result<()> {
        down()
    }
    fn zremrangebyscore(&self, _: &str, _: f64) -> Result<u64> {
        down()
    }
    fn zcard(&self, _: &str) -> Result<u64> {
        down()
    }
    fn expire(&self, _: &str, _: Duration) -> Result<()> {
        down()
    }
    fn scan_prefix(&self, _: &str, _: &str, _: usize) -> Result<Vec<String>> {
        down()
    }
}
