//! Configuration, loaded from `config.yaml` in the data directory.
//!
//! Every field has a serde default so a partial file works; a missing
//! file is written out with defaults on first run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::InteractionKind;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Sentence-embedding model name.
    pub model: String,
    /// Declared vector dimension; must equal the model's output dim.
    pub dim: usize,
    /// cpu|gpu. Selection only; never affects results.
    pub device: String,
    /// Abort on model load failure instead of falling back to the
    /// deterministic pseudo-embedder.
    pub strict: bool,
    /// Model cache directory, relative to the data dir unless absolute.
    pub cache_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".into(),
            dim: crate::embedding::DEFAULT_DIM,
            device: "cpu".into(),
            strict: false,
            cache_dir: "models".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Abort a build with fewer future events than this.
    pub min_events: usize,
    /// Abort a build with fewer active users than this.
    pub min_users: usize,
    /// Scheduled retrain interval.
    pub retrain_interval_days: i64,
    /// Event-set delta fraction that forces a retrain before the interval.
    pub retrain_delta_fraction: f64,
    /// Neighbors kept per user in the similarity table.
    pub user_sim_top_k: usize,
    /// Event sample size for the diversity metric.
    pub diversity_sample: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_events: 5,
            min_users: 1,
            retrain_interval_days: 7,
            retrain_delta_fraction: 0.10,
            user_sim_top_k: 20,
            diversity_sample: 32,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interaction lookback window for user-vector synthesis.
    pub recency_horizon_days: i64,
    /// Weight of the stored profile vector blended into the synthesized
    /// interaction vector.
    pub cold_start_blend: f32,
    /// Budget for connector calls on the serving path.
    pub connector_timeout_ms: u64,
    /// Budget for vector-store reads on the serving path.
    pub store_timeout_ms: u64,
    /// Per-kind overrides of the interaction weight table.
    pub interaction_weights: HashMap<InteractionKind, f32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recency_horizon_days: 30,
            cold_start_blend: 0.25,
            connector_timeout_ms: 2000,
            store_timeout_ms: 2000,
            interaction_weights: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Effective weight for a kind: config override or the base table.
    pub fn interaction_weight(&self, kind: InteractionKind) -> f32 {
        self.interaction_weights
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.base_weight())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

impl Config {
    /// Load from `<base>/config.yaml`, writing defaults on first run.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join("config.yaml");
        if !path.exists() {
            let config = Self::default();
            std::fs::create_dir_all(base_path)?;
            std::fs::write(&path, serde_yml::to_string(&config)?)?;
            log::info!("wrote default config to {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: Self = serde_yml::from_str(&contents)?;
        Ok(config)
    }

    /// Model cache directory resolved against the data dir.
    pub fn embedding_cache_dir(&self, base_path: &Path) -> PathBuf {
        let cache = Path::new(&self.embedding.cache_dir);
        if cache.is_absolute() {
            cache.to_path_buf()
        } else {
            base_path.join(cache)
        }
    }
}
