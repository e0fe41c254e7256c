//! Online recommendation engine.
//!
//! Per request: synthesize the viewer's vector from recent interactions,
//! retrieve candidates by cosine search, apply social and recency
//! adjustments under the active strategy, rank, and emit with provenance.
//!
//! The pipeline is Init -> Synthesize -> Retrieve -> Boost -> Rank ->
//! Emit; any step may divert to Fallback, which emits the popularity
//! list and terminates. No step retries internally. The engine is pure
//! reads: a cancelled request has no side effects.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::connector::Connector;
use crate::domain::{EventMeta, Interaction, InteractionKind, UserMeta};
use crate::embedding::normalize_in_place;
use crate::errors::EngineError;
use crate::store::{Collection, SimTable, StoreError, VectorStore};
use crate::strategy::Strategy;

/// Interaction recency half-life control: weight decays as exp(-age/14).
const RECENCY_DECAY_DAYS: f32 = 14.0;

/// A scoring component below this threshold is not considered a material
/// contributor for provenance.
const CONTRIBUTION_THRESHOLD: f32 = 1e-4;

/// Upper bound on requested result count.
pub const MAX_K: usize = 50;

// ── Model handle ──────────────────────────────────────────────────────

/// An immutable, fully-loaded set of artifacts from one model version.
///
/// Loaded once and passed explicitly; a version swap replaces the handle
/// atomically at the serving layer, never in place. A request that began
/// on version V finishes on V.
pub struct ModelHandle {
    pub version: u64,
    pub events: Collection<i64, EventMeta>,
    pub users: Collection<String, UserMeta>,
    pub sim: SimTable,
}

impl ModelHandle {
    /// Load the current artifacts. Fails with an integrity error on any
    /// checksum or dimension mismatch.
    pub fn load(store: &VectorStore, artifacts_dir: &Path) -> Result<Self, EngineError> {
        let events: Collection<i64, EventMeta> = store.read("events")?;
        let users: Collection<String, UserMeta> = store.read("users")?;
        if events.manifest.dim != users.manifest.dim {
            return Err(EngineError::Integrity(format!(
                "collection dims diverge: events {} vs users {}",
                events.manifest.dim, users.manifest.dim
            )));
        }

        // The similarity table is an optional accelerator
        let sim = match store.read_sim() {
            Ok(sim) => sim,
            Err(StoreError::Missing(_)) => SimTable::default(),
            Err(e) => return Err(e.into()),
        };

        let version = crate::builder::latest_version(artifacts_dir)
            .map_err(|e| EngineError::Integrity(e.to_string()))?
            .map(|v| v.version)
            .unwrap_or(0);

        Ok(Self {
            version,
            events,
            users,
            sim,
        })
    }
}

// ── Request / response types ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecRequest {
    pub viewer_id: String,
    pub k: usize,
    pub strategy: Strategy,
}

/// Which scoring components materially contributed to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    #[serde(rename = "content")]
    Content,
    #[serde(rename = "content+social")]
    ContentSocial,
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "fallback")]
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecItem {
    pub event_id: i64,
    pub score: f32,
    pub friend_count: u32,
    pub friend_boost: f32,
    pub source: Source,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecResponse {
    pub items: Vec<RecItem>,
    pub model_version: u64,
    pub strategy: Strategy,
    pub generated_at: DateTime<Utc>,
}

// ── Cancellation and deadline plumbing ────────────────────────────────

/// Shared cancellation flag checked at step boundaries. Cancelling a
/// request aborts it without emitting any result.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline steps, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Synthesize,
    Retrieve,
    Boost,
    Rank,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Synthesize => "synthesize",
            Step::Retrieve => "retrieve",
            Step::Boost => "boost",
            Step::Rank => "rank",
        };
        f.write_str(name)
    }
}

/// Wall-clock budget for the blocking parts of one request.
struct Budget {
    started: Instant,
    limit: std::time::Duration,
}

impl Budget {
    fn new(config: &EngineConfig) -> Self {
        Self {
            started: Instant::now(),
            limit: std::time::Duration::from_millis(
                config.connector_timeout_ms + config.store_timeout_ms,
            ),
        }
    }

    fn check(&self, step: Step) -> Result<(), EngineError> {
        if self.started.elapsed() > self.limit {
            return Err(EngineError::Degraded(format!(
                "deadline exceeded at {step} step"
            )));
        }
        Ok(())
    }
}

// ── Engine ────────────────────────────────────────────────────────────

pub struct RecommendationEngine<'a> {
    config: &'a EngineConfig,
    connector: &'a dyn Connector,
}

struct Candidate {
    event_id: i64,
    base: f32,
    friend_count: u32,
    friend_mult: f32,
    score: f32,
    start_time: DateTime<Utc>,
}

impl<'a> RecommendationEngine<'a> {
    pub fn new(config: &'a EngineConfig, connector: &'a dyn Connector) -> Self {
        Self { config, connector }
    }

    /// Produce the ranked list for one viewer.
    ///
    /// Bad input surfaces as `InvalidArgument`; integrity failures,
    /// timeouts, a missing viewer, or an unusable vector all divert to
    /// the popularity fallback. Never returns an empty success: either a
    /// ranked list (short only when candidates are exhausted) or a
    /// fallback list tagged as such.
    pub fn recommend(
        &self,
        handle: &ModelHandle,
        req: &RecRequest,
        cancel: &CancelToken,
    ) -> Result<RecResponse, EngineError> {
        if req.k < 1 || req.k > MAX_K {
            return Err(EngineError::InvalidArgument(format!(
                "k must be in 1..={MAX_K}, got {}",
                req.k
            )));
        }
        if req.viewer_id.trim().is_empty() {
            return Err(EngineError::InvalidArgument("viewer_id is empty".into()));
        }

        match self.pipeline(handle, req, cancel) {
            // Never an empty success: exhausted candidates divert too
            Ok(items) if items.is_empty() => {
                log::debug!("no candidates for '{}', serving fallback", req.viewer_id);
                self.fallback(req.k, handle.version, req.strategy)
            }
            Ok(items) => Ok(self.emit(items, handle.version, req.strategy)),
            Err(EngineError::InvalidArgument(e)) => Err(EngineError::InvalidArgument(e)),
            Err(EngineError::Internal(e)) => Err(EngineError::Internal(e)),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(diverted) => {
                log::warn!(
                    "request for '{}' diverted to fallback: {diverted}",
                    req.viewer_id
                );
                self.fallback(req.k, handle.version, req.strategy)
            }
        }
    }

    /// The popularity fallback: earliest upcoming events, zero scores.
    pub fn fallback(
        &self,
        k: usize,
        model_version: u64,
        strategy: Strategy,
    ) -> Result<RecResponse, EngineError> {
        let mut events = self.connector.future_events()?;
        events.sort_by_key(|e| (e.start_time, e.event_id));
        let items = events
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, e)| RecItem {
                event_id: e.event_id,
                score: 0.0,
                friend_count: 0,
                friend_boost: 1.0,
                source: Source::Fallback,
                rank: i + 1,
            })
            .collect();
        Ok(RecResponse {
            items,
            model_version,
            strategy,
            generated_at: Utc::now(),
        })
    }

    fn pipeline(
        &self,
        handle: &ModelHandle,
        req: &RecRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<RecItem>, EngineError> {
        let now = Utc::now();
        let budget = Budget::new(self.config);
        let weights = req.strategy.weights();

        // Init: the viewer must exist
        check_cancelled(cancel)?;
        if self.connector.user(&req.viewer_id)?.is_none() {
            return Err(EngineError::NotFound(req.viewer_id.clone()));
        }

        // Synthesize
        budget.check(Step::Synthesize)?;
        let user_vec = self.synthesize(handle, &req.viewer_id, now)?;
        log::debug!("synthesized user vector for '{}'", req.viewer_id);

        // Retrieve
        check_cancelled(cancel)?;
        budget.check(Step::Retrieve)?;
        let excluded = self.excluded_events(&req.viewer_id)?;
        let k_search = std::cmp::max(100, 4 * req.k);
        let viewer = req.viewer_id.clone();
        let hits = handle.events.search(&user_vec, k_search, |id, meta| {
            meta.start_time > now && !meta.archived && meta.organizer != viewer && !excluded.contains(id)
        })?;

        // Boost
        check_cancelled(cancel)?;
        budget.check(Step::Boost)?;
        let friend_counts = self.friend_counts(&req.viewer_id)?;

        let mut candidates: Vec<Candidate> = Vec::with_capacity(hits.len());
        for (event_id, base) in hits {
            let meta = handle
                .events
                .meta(&event_id)
                .ok_or_else(|| EngineError::Internal(format!("candidate {event_id} lost its metadata")))?;
            let friend_count = friend_counts.get(&event_id).copied().unwrap_or(0);
            if weights.drop_no_friends && friend_count == 0 {
                continue;
            }
            let capped = friend_count.min(weights.friend_cap) as f32;
            let friend_mult = 1.0 + weights.friend_step * capped;
            let recency_mult = recency_multiplier(meta.start_time, now);
            let score = if weights.base_sim_weight > 0.0 {
                base * weights.base_sim_weight * friend_mult * recency_mult
            } else {
                // Friends-only substitute: similarity plays no part
                weights.friend_step * capped
            };
            candidates.push(Candidate {
                event_id,
                base,
                friend_count,
                friend_mult,
                score,
                start_time: meta.start_time,
            });
        }

        // Rank
        check_cancelled(cancel)?;
        budget.check(Step::Rank)?;
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.start_time.cmp(&b.start_time))
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        candidates.truncate(req.k);

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| RecItem {
                event_id: c.event_id,
                score: c.score,
                friend_count: c.friend_count,
                friend_boost: c.friend_mult,
                source: source_tag(&weights, &c),
                rank: i + 1,
            })
            .collect())
    }

    fn emit(&self, items: Vec<RecItem>, model_version: u64, strategy: Strategy) -> RecResponse {
        RecResponse {
            items,
            model_version,
            strategy,
            generated_at: Utc::now(),
        }
    }

    /// Synthesize the viewer's vector.
    ///
    /// With recent interactions: weighted average of interacted event
    /// vectors (weight = kind weight x recency decay) blended with the
    /// stored profile vector at `cold_start_blend`, renormalized. With
    /// none: the stored profile vector alone. A profile with no interests
    /// and no bio is not usable on its own.
    fn synthesize(
        &self,
        handle: &ModelHandle,
        viewer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<f32>, EngineError> {
        let cutoff = now - Duration::days(self.config.recency_horizon_days);
        let mut interactions = self.connector.interactions_since(viewer_id, cutoff)?;

        // Synthetic friend_going rows from followees' RSVPs
        for rsvp in self.connector.friend_rsvps(viewer_id)? {
            if rsvp.created_at >= cutoff {
                interactions.push(Interaction {
                    user_id: viewer_id.to_string(),
                    event_id: rsvp.event_id,
                    kind: InteractionKind::FriendGoing,
                    created_at: rsvp.created_at,
                });
            }
        }

        let stored = self.stored_profile_vector(handle, viewer_id);

        let dim = handle.events.manifest.dim;
        let mut acc = vec![0.0f32; dim];
        let mut total_weight = 0.0f32;
        for interaction in &interactions {
            let Some(event_vec) = handle.events.vector(&interaction.event_id) else {
                // Interacted event not in the model (archived since, or
                // dropped by validation). Reported and skipped whole.
                log::debug!(
                    "interaction references event {} missing from the model",
                    interaction.event_id
                );
                continue;
            };
            let age_days = (now - interaction.created_at).num_days().max(0) as f32;
            let weight = self.config.interaction_weight(interaction.kind)
                * (-age_days / RECENCY_DECAY_DAYS).exp();
            for (a, x) in acc.iter_mut().zip(event_vec) {
                *a += weight * x;
            }
            total_weight += weight;
        }

        if total_weight <= f32::EPSILON {
            // Cold start: the stored profile vector is all we have
            return stored
                .map(|v| v.to_vec())
                .ok_or_else(|| EngineError::NotFound(format!("no usable vector for '{viewer_id}'")));
        }

        for a in acc.iter_mut() {
            *a /= total_weight;
        }
        if let Some(profile) = stored {
            for (a, p) in acc.iter_mut().zip(profile) {
                *a += self.config.cold_start_blend * p;
            }
        }
        normalize_in_place(&mut acc);
        Ok(acc)
    }

    /// The stored profile vector, if the profile has enough signal to
    /// mean anything (at least one interest or bio token).
    fn stored_profile_vector<'h>(
        &self,
        handle: &'h ModelHandle,
        viewer_id: &str,
    ) -> Option<&'h [f32]> {
        let id = viewer_id.to_string();
        let meta = handle.users.meta(&id)?;
        if meta.interests.is_empty() && meta.bio.trim().is_empty() {
            return None;
        }
        handle.users.vector(&id)
    }

    /// Events the viewer already committed to: going or organized, any
    /// age.
    fn excluded_events(&self, viewer_id: &str) -> Result<HashSet<i64>, EngineError> {
        let all = self
            .connector
            .interactions_since(viewer_id, DateTime::<Utc>::MIN_UTC)?;
        Ok(all
            .into_iter()
            .filter(|i| matches!(i.kind, InteractionKind::Going | InteractionKind::Organized))
            .map(|i| i.event_id)
            .collect())
    }

    /// Distinct followees with going/interested per candidate event.
    fn friend_counts(&self, viewer_id: &str) -> Result<HashMap<i64, u32>, EngineError> {
        let rsvps = self.connector.friend_rsvps(viewer_id)?;
        let mut per_event: HashMap<i64, HashSet<String>> = HashMap::new();
        for rsvp in rsvps {
            per_event
                .entry(rsvp.event_id)
                .or_default()
                .insert(rsvp.friend_id);
        }
        Ok(per_event
            .into_iter()
            .map(|(event_id, friends)| (event_id, friends.len() as u32))
            .collect())
    }
}

fn check_cancelled(cancel: &CancelToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// Temporal proximity multiplier over whole days until start. Monotone
/// step function, continuous at the bucket edges from above.
fn recency_multiplier(start_time: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let days_until = (start_time - now).num_days();
    if days_until <= 7 {
        1.25
    } else if days_until <= 14 {
        1.10
    } else {
        1.00
    }
}

fn source_tag(weights: &crate::strategy::StrategyWeights, c: &Candidate) -> Source {
    let content = weights.base_sim_weight * c.base > CONTRIBUTION_THRESHOLD;
    let social = c.friend_count > 0 && weights.friend_step > CONTRIBUTION_THRESHOLD;
    match (content, social) {
        (true, true) => Source::ContentSocial,
        (true, false) => Source::Content,
        (false, true) => Source::Social,
        // Nothing contributed materially; similarity was still the input
        (false, false) => Source::Content,
    }
}
