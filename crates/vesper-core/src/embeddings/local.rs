//! Local fastembed backend
//!
//! ONNX inference via fastembed (nomic-embed-text-v1.5, 768d), truncated to
//! the configured dimension and L2-normalized. Nomic v1.5 supports Matryoshka
//! representation learning, so the first N dimensions of the 768-dim output
//! are themselves a valid N-dim embedding.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::Embedder;
use crate::error::{Result, VesperError};

/// Maximum text length passed to the model (truncated if longer)
const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for embed_batch
const BATCH_SIZE: usize = 32;

static EMBEDDING_MODEL_RESULT: OnceLock<std::result::Result<Mutex<TextEmbedding>, String>> =
    OnceLock::new();

fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("VESPER_EMBED_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(base) = directories::BaseDirs::new() {
        return base.home_dir().join(".vesper").join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = get_cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create cache directory {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("Failed to initialize embedding model: {}", e))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| VesperError::Upstream(format!("Embedding model lock poisoned: {}", e))),
        Err(err) => Err(VesperError::Upstream(err.clone())),
    }
}

/// Truncate to `dimensions` and L2-normalize
fn truncate_normalize(mut vector: Vec<f32>, dimensions: usize) -> Vec<f32> {
    if vector.len() > dimensions {
        vector.truncate(dimensions);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// fastembed-backed embedder
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    /// Create a local embedder producing `dimensions`-length vectors.
    /// The model is loaded lazily on the first embed call.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Eagerly load the model, surfacing download/init failures
    pub fn init(&self) -> Result<()> {
        get_model().map(|_| ())
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(VesperError::validation("text", "cannot be empty"));
        }

        let mut model = get_model()?;

        let text = if text.len() > MAX_TEXT_LENGTH {
            &text[..MAX_TEXT_LENGTH]
        } else {
            text
        };

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| VesperError::Upstream(format!("Embedding generation failed: {}", e)))?;

        let first = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| VesperError::Upstream("No embedding generated".to_string()))?;

        Ok(truncate_normalize(first, self.dimensions))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = get_model()?;
        let mut all = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| {
                    if t.len() > MAX_TEXT_LENGTH {
                        &t[..MAX_TEXT_LENGTH]
                    } else {
                        *t
                    }
                })
                .collect();

            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| VesperError::Upstream(format!("Embedding generation failed: {}", e)))?;

            for emb in embeddings {
                all.push(truncate_normalize(emb, self.dimensions));
            }
        }

        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
