//! Engine assembly
//!
//! Wires the core components over shared backing stores and owns the
//! process-wide enable flag. Tool handlers receive an `Arc<Engine>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vesper_core::{
    Cache, ConsolidationConfig, ConsolidationPipeline, ConsolidationScheduler, Database, Embedder,
    GraphStore, MemoryCache, Operation, QueryRouter, RateLimiter, Result, SkillLibrary,
    VesperConfig, WorkingMemory,
};

/// Shared engine state behind the tool surface
pub struct Engine {
    pub config: VesperConfig,
    pub working: Arc<WorkingMemory>,
    pub graph: Arc<GraphStore>,
    pub skills: Arc<SkillLibrary>,
    pub router: QueryRouter,
    pub limiter: RateLimiter,
    pub pipeline: Arc<ConsolidationPipeline>,
    pub scheduler: Arc<ConsolidationScheduler>,
    pub embedder: Arc<dyn Embedder>,
    enabled: AtomicBool,
}

impl Engine {
    /// Build the engine from configuration. The database lands under the
    /// storage root; the working-memory cache is in-process.
    pub fn new(config: VesperConfig) -> Result<Self> {
        let db = Arc::new(Database::open(&config.database_path()?)?);
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        let working = Arc::new(WorkingMemory::new(Arc::clone(&cache), &config));
        let graph = Arc::new(GraphStore::new(Arc::clone(&db)));
        let embedder = default_embedder(config.embedding_dimensions);
        let skills = Arc::new(SkillLibrary::new(
            Arc::clone(&db),
            Some(Arc::clone(&embedder)),
            config.embedding_dimensions,
        ));

        let router = QueryRouter::new(
            Arc::clone(&working),
            Arc::clone(&graph),
            Arc::clone(&skills),
        );
        let limiter = RateLimiter::new(Arc::clone(&cache), config.fail_closed);

        let pipeline = Arc::new(ConsolidationPipeline::new(
            Arc::clone(&working),
            Arc::clone(&graph),
            Arc::clone(&skills),
            Arc::clone(&db),
            ConsolidationConfig {
                backup_retention_days: config.backup_retention_days,
                ..ConsolidationConfig::default()
            },
        ));
        let scheduler = Arc::new(ConsolidationScheduler::new(
            Arc::clone(&pipeline),
            Arc::clone(&working),
            config.schedule_hour,
            config.schedule_minute,
        ));

        Ok(Self {
            config,
            working,
            graph,
            skills,
            router,
            limiter,
            pipeline,
            scheduler,
            embedder,
            enabled: AtomicBool::new(true),
        })
    }

    /// Whether the engine is serving operations
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the enable flag; returns the previous value
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    /// Rate-limit bucket for a tool operation
    pub fn operation_of(tool: &str) -> Operation {
        match tool {
            "retrieve_memory" | "load_skill" => Operation::Retrieve,
            "list_recent" => Operation::ListRecent,
            "get_stats" | "list_namespaces" | "namespace_stats" => Operation::GetStats,
            _ => Operation::Store,
        }
    }
}

#[cfg(feature = "embeddings")]
fn default_embedder(dimensions: usize) -> Arc<dyn Embedder> {
    Arc::new(vesper_core::LocalEmbedder::new(dimensions))
}

#[cfg(not(feature = "embeddings"))]
fn default_embedder(dimensions: usize) -> Arc<dyn Embedder> {
    Arc::new(vesper_core::HashEmbedder::new(dimensions))
}
