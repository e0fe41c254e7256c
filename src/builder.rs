//! Offline model builder.
//!
//! A single-threaded batch job: read everything through the connector,
//! compose canonical texts, embed, compute the user-similarity table, and
//! publish the three collections plus a version record and quality
//! metrics. Stateless between runs; a failed run leaves the previous
//! artifacts intact.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::connector::{Connector, ConnectorError};
use crate::domain::{Event, EventMeta, User, UserMeta};
use crate::embedding::{dot, Embedder, EmbeddingError};
use crate::preprocess::{canonical_event_text, canonical_user_text};
use crate::store::{Matrix, SimTable, StoreError, VectorStore};

/// Minimum title length (chars, trimmed) for an event to be embedded.
const MIN_TITLE_CHARS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("not enough events to build: {got} valid, {need} required")]
    NotEnoughEvents { got: usize, need: usize },

    #[error("not enough users to build: {got} found, {need} required")]
    NotEnoughUsers { got: usize, need: usize },

    #[error("embedder produces dim {got}, config declares {declared}")]
    DimensionMismatch { got: usize, declared: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Checksums of the three collections of one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumSet {
    pub events: String,
    pub users: String,
    pub user_sim: String,
}

/// One entry of `versions.json`. Versions increase monotonically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub events: usize,
    pub users: usize,
    pub sha256: ChecksumSet,
}

/// Quality metrics emitted alongside each build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMetrics {
    /// Fraction of embedded events with a non-empty canonical text.
    pub event_coverage: f64,
    /// Fraction of users with at least one interest or bio token.
    pub user_coverage: f64,
    /// Events rejected by validation before embedding.
    pub dropped_events: usize,
    /// Re-embedding a sample text reproduced its stored row exactly.
    pub determinism_ok: bool,
    /// 1 - mean pairwise cosine over a random event sample.
    pub mean_pairwise_diversity: f64,
    pub generated_at: DateTime<Utc>,
}

/// Result of a completed build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub version: VersionRecord,
    pub metrics: BuildMetrics,
}

/// Why a retrain is (or is not) due.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrainDecision {
    Due(String),
    Fresh(String),
}

pub struct ModelBuilder<'a> {
    config: &'a Config,
    connector: &'a dyn Connector,
    embedder: &'a dyn Embedder,
    store: &'a VectorStore,
    artifacts_dir: PathBuf,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(
        config: &'a Config,
        connector: &'a dyn Connector,
        embedder: &'a dyn Embedder,
        store: &'a VectorStore,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            connector,
            embedder,
            store,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Run the full build. All artifacts are computed in memory, staged
    /// into a sibling store root, and published with a single directory
    /// swap: a failure at any point leaves the previous model intact.
    pub fn run(&self) -> Result<BuildReport, BuildError> {
        let dim = self.embedder.dim();
        if dim != self.config.embedding.dim {
            return Err(BuildError::DimensionMismatch {
                got: dim,
                declared: self.config.embedding.dim,
            });
        }

        let categories = self.connector.categories()?;
        let tags = self.connector.tags()?;
        log::info!(
            "vocabulary: {} categories, {} tags",
            categories.len(),
            tags.len()
        );

        // Events
        let all_events = self.connector.future_events()?;
        let (events, dropped) = validate_events(all_events);
        if events.len() < self.config.builder.min_events {
            return Err(BuildError::NotEnoughEvents {
                got: events.len(),
                need: self.config.builder.min_events,
            });
        }
        let event_texts: Vec<String> = events.iter().map(canonical_event_text).collect();
        let event_rows = self.embedder.embed_batch(&event_texts)?;
        let mut event_matrix = Matrix::with_capacity(dim, events.len());
        for row in &event_rows {
            event_matrix.push_row(row)?;
        }
        let event_ids: Vec<i64> = events.iter().map(|e| e.event_id).collect();
        let event_meta: Vec<EventMeta> = events.iter().map(EventMeta::from).collect();

        // Users
        let users = self.connector.active_users()?;
        if users.len() < self.config.builder.min_users {
            return Err(BuildError::NotEnoughUsers {
                got: users.len(),
                need: self.config.builder.min_users,
            });
        }
        let user_texts: Vec<String> = users.iter().map(canonical_user_text).collect();
        let user_rows = self.embedder.embed_batch(&user_texts)?;
        let mut user_matrix = Matrix::with_capacity(dim, users.len());
        for row in &user_rows {
            user_matrix.push_row(row)?;
        }
        let user_ids: Vec<String> = users.iter().map(|u| u.user_id.clone()).collect();
        let user_meta: Vec<UserMeta> = users.iter().map(UserMeta::from).collect();

        // User-user similarity, top-K per user
        let sim = similarity_table(
            &user_ids,
            &user_matrix,
            self.config.builder.user_sim_top_k,
        );

        // Metrics (before publication so a metric failure aborts cleanly)
        let metrics = self.compute_metrics(
            &events,
            &event_texts,
            &event_rows,
            &users,
            dropped,
        )?;

        // Collections must share one dimension before anything is staged
        if event_matrix.dim() != user_matrix.dim() {
            return Err(BuildError::DimensionMismatch {
                got: user_matrix.dim(),
                declared: event_matrix.dim(),
            });
        }

        // Publish: stage all three collections, then one atomic swap. A
        // failed stage drops the batch and the live set is untouched.
        let batch = self.store.begin_batch()?;
        let events_manifest =
            batch
                .store()
                .write("events", &event_ids, &event_matrix, &event_meta)?;
        let users_manifest = batch
            .store()
            .write("users", &user_ids, &user_matrix, &user_meta)?;
        let sim_manifest = batch
            .store()
            .write_sim(&sim, self.config.builder.user_sim_top_k)?;
        batch.commit()?;

        let version = self.append_version(VersionEntryInput {
            events: event_ids.len(),
            users: user_ids.len(),
            sha256: ChecksumSet {
                events: events_manifest.sha256_hex,
                users: users_manifest.sha256_hex,
                user_sim: sim_manifest.sha256_hex,
            },
        })?;
        self.write_metrics(&metrics)?;

        log::info!(
            "build complete: version {} ({} events, {} users)",
            version.version,
            version.events,
            version.users
        );
        Ok(BuildReport { version, metrics })
    }

    /// Decide whether a retrain is due: no previous version, interval
    /// elapsed, or the event set drifted past the delta threshold.
    pub fn should_retrain(&self) -> Result<RetrainDecision, BuildError> {
        let versions = self.read_versions()?;
        let last = match versions.last() {
            None => return Ok(RetrainDecision::Due("no previous model".into())),
            Some(v) => v,
        };

        let age_days = (Utc::now() - last.created_at).num_days();
        if age_days >= self.config.builder.retrain_interval_days {
            return Ok(RetrainDecision::Due(format!(
                "model is {age_days} days old"
            )));
        }

        let current = self.connector.future_events()?.len();
        let baseline = last.events.max(1);
        let delta = (current as f64 - last.events as f64).abs() / baseline as f64;
        if delta >= self.config.builder.retrain_delta_fraction {
            return Ok(RetrainDecision::Due(format!(
                "event set drifted {:.0}% ({} -> {})",
                delta * 100.0,
                last.events,
                current
            )));
        }

        Ok(RetrainDecision::Fresh(format!(
            "version {} is {age_days} days old, drift {:.0}%",
            last.version,
            delta * 100.0
        )))
    }

    pub fn versions_path(&self) -> PathBuf {
        self.artifacts_dir.join("versions.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.artifacts_dir.join("metrics.json")
    }

    /// Latest published model version, if any.
    pub fn current_version(&self) -> Result<Option<VersionRecord>, BuildError> {
        Ok(self.read_versions()?.into_iter().last())
    }

    fn read_versions(&self) -> Result<Vec<VersionRecord>, BuildError> {
        read_versions_at(&self.versions_path())
    }

    fn append_version(&self, input: VersionEntryInput) -> Result<VersionRecord, BuildError> {
        let mut versions = self.read_versions()?;
        let version = VersionRecord {
            version: versions.last().map(|v| v.version + 1).unwrap_or(1),
            created_at: Utc::now(),
            events: input.events,
            users: input.users,
            sha256: input.sha256,
        };
        versions.push(version.clone());
        write_json_atomic(&self.versions_path(), &versions)?;
        Ok(version)
    }

    fn write_metrics(&self, metrics: &BuildMetrics) -> Result<(), BuildError> {
        write_json_atomic(&self.metrics_path(), metrics)
    }

    fn compute_metrics(
        &self,
        events: &[Event],
        event_texts: &[String],
        event_rows: &[Vec<f32>],
        users: &[User],
        dropped_events: usize,
    ) -> Result<BuildMetrics, BuildError> {
        let covered_events = event_texts.iter().filter(|t| !t.is_empty()).count();
        let event_coverage = covered_events as f64 / events.len().max(1) as f64;

        let covered_users = users
            .iter()
            .filter(|u| !u.interests.is_empty() || !u.bio.trim().is_empty())
            .count();
        let user_coverage = covered_users as f64 / users.len().max(1) as f64;

        // Spot-check: re-embedding the first text must reproduce its row
        let determinism_ok = match (event_texts.first(), event_rows.first()) {
            (Some(text), Some(row)) => {
                &self.embedder.embed_batch(&[text.clone()])?[0] == row
            }
            _ => true,
        };

        let diversity = diversity_metric(
            event_rows,
            self.config.builder.diversity_sample,
        );

        Ok(BuildMetrics {
            event_coverage,
            user_coverage,
            dropped_events,
            determinism_ok,
            mean_pairwise_diversity: diversity,
            generated_at: Utc::now(),
        })
    }
}

struct VersionEntryInput {
    events: usize,
    users: usize,
    sha256: ChecksumSet,
}

/// Read the full version history from `versions.json`.
pub fn read_versions_at(path: &Path) -> Result<Vec<VersionRecord>, BuildError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Latest published model version under an artifacts directory, if any.
pub fn latest_version(artifacts_dir: &Path) -> Result<Option<VersionRecord>, BuildError> {
    Ok(read_versions_at(&artifacts_dir.join("versions.json"))?
        .into_iter()
        .last())
}

/// Drop events that fail validation. Returns (valid, dropped count).
fn validate_events(events: Vec<Event>) -> (Vec<Event>, usize) {
    let before = events.len();
    let valid: Vec<Event> = events
        .into_iter()
        .filter(|e| e.title.trim().chars().count() >= MIN_TITLE_CHARS)
        .collect();
    let dropped = before - valid.len();
    if dropped > 0 {
        log::warn!("dropped {dropped} events failing validation");
    }
    (valid, dropped)
}

/// Cosine top-K neighbors per user over a row-normalized matrix.
fn similarity_table(user_ids: &[String], matrix: &Matrix, k: usize) -> SimTable {
    let mut table = SimTable::default();
    for i in 0..user_ids.len() {
        let mut scored: Vec<(String, f32)> = (0..user_ids.len())
            .filter(|&j| j != i)
            .map(|j| (user_ids[j].clone(), dot(matrix.row(i), matrix.row(j))))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        table.neighbors.insert(user_ids[i].clone(), scored);
    }
    table
}

/// 1 - mean pairwise cosine over a random sample of rows. Higher means a
/// more spread-out embedding space. Zero when fewer than two rows.
fn diversity_metric(rows: &[Vec<f32>], sample_size: usize) -> f64 {
    if rows.len() < 2 {
        return 0.0;
    }
    let mut indices: Vec<usize> = (0..rows.len()).collect();
    let mut rng = rand::thread_rng();
    indices.shuffle(&mut rng);
    indices.truncate(sample_size.max(2));

    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for a in 0..indices.len() {
        for b in (a + 1)..indices.len() {
            total += dot(&rows[indices[a]], &rows[indices[b]]) as f64;
            pairs += 1;
        }
    }
    1.0 - total / pairs as f64
}

/// Write JSON to a sibling temp file, then rename into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
