//! Embedding generation for canonical texts.
//!
//! Two providers behind one trait:
//! - `FastembedEmbedder` wraps fastembed's `TextEmbedding` (ONNX). The
//!   model is held behind a Mutex because `embed()` takes `&mut self`.
//! - `HashEmbedder` is a deterministic pseudo-embedding for tests and for
//!   lenient degradation when the model cannot be loaded: sha256 of the
//!   input seeds a SplitMix64 stream expanded to D floats in [-1, 1],
//!   then L2-normalized.
//!
//! Both guarantee unit-norm rows and that batching never changes results.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Batch size cap for embedding calls. Larger inputs are chunked.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Default embedding dimension (all-MiniLM-L6-v2).
pub const DEFAULT_DIM: usize = 384;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedder produces dimension {got}, store declares {declared}")]
    DimensionMismatch { got: usize, declared: usize },
}

/// Maps canonical strings to L2-normalized vectors of a fixed dimension.
pub trait Embedder: Send + Sync {
    /// Output dimension of every vector this embedder produces.
    fn dim(&self) -> usize;

    /// Embed a batch of texts. One output row per input, same order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let batch = self.embed_batch(&[text.to_string()])?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

/// Wrapper around fastembed's TextEmbedding model.
pub struct FastembedEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastembedEmbedder {
    /// Create an embedder for the named model, downloading to `cache_dir`
    /// on first use.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized MiniLM)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for FastembedEmbedder {
    fn dim(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let mut rows = model
                .embed(chunk.to_vec(), None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            for row in &mut rows {
                normalize_in_place(row);
            }
            out.append(&mut rows);
        }
        Ok(out)
    }
}

/// Deterministic pseudo-embedder: hash -> vector -> normalize.
///
/// Identical inputs yield bit-identical outputs across runs and batch
/// splits. Never use in production with strict_embedding set.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| hash_embed(t, self.dimensions))
            .collect())
    }
}

/// Expand sha256(text) into `dim` floats in [-1, 1], then L2-normalize.
/// Empty text gets a fixed unit basis vector so downstream code never
/// sees a zero-norm row.
fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};

    if text.trim().is_empty() {
        let mut v = vec![0.0f32; dim];
        if dim > 0 {
            v[0] = 1.0;
        }
        return v;
    }

    let digest = Sha256::digest(text.as_bytes());
    let mut seed = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));

    let mut v: Vec<f32> = (0..dim)
        .map(|_| {
            seed = splitmix64(seed);
            // Map the top 24 bits to [-1, 1]
            let unit = (seed >> 40) as f32 / ((1u64 << 24) - 1) as f32;
            unit * 2.0 - 1.0
        })
        .collect();
    normalize_in_place(&mut v);
    v
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Normalize a vector to unit L2 norm in place. Zero vectors are left
/// untouched.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Build the configured embedder.
///
/// With `strict` set, a model-load failure is fatal. Otherwise it is
/// logged and the deterministic hash embedder takes over at the declared
/// dimension.
pub fn build_embedder(
    model_name: &str,
    cache_dir: PathBuf,
    declared_dim: usize,
    strict: bool,
) -> Result<Box<dyn Embedder>, EmbeddingError> {
    match FastembedEmbedder::new(model_name, cache_dir) {
        Ok(embedder) => {
            if embedder.dim() != declared_dim {
                return Err(EmbeddingError::DimensionMismatch {
                    got: embedder.dim(),
                    declared: declared_dim,
                });
            }
            Ok(Box::new(embedder))
        }
        Err(e) if !strict => {
            log::warn!(
                "embedding model '{}' unavailable ({}), using deterministic fallback",
                model_name,
                e
            );
            Ok(Box::new(HashEmbedder::new(declared_dim)))
        }
        Err(e) => Err(e),
    }
}
