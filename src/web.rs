//! HTTP serving surface.
//!
//! `GET /api/recommendations` serves ranked lists; `POST /api/refresh`
//! rebuilds the model. The loaded model lives behind a `RwLock<Option<
//! Arc<ModelHandle>>>`: requests clone the Arc and keep their snapshot
//! for the whole request, refresh swaps the slot when a build succeeds.
//! Concurrent refreshes coalesce on a try-lock; only one build runs at a
//! time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::builder::{ModelBuilder, RetrainDecision};
use crate::config::Config;
use crate::connector::Connector;
use crate::embedding::build_embedder;
use crate::engine::{CancelToken, ModelHandle, RecRequest, RecResponse, RecommendationEngine};
use crate::errors::EngineError;
use crate::store::VectorStore;
use crate::strategy::Strategy;

struct SharedState {
    config: Config,
    data_dir: PathBuf,
    connector: Box<dyn Connector>,
    model: RwLock<Option<Arc<ModelHandle>>>,
    build_lock: Mutex<()>,
}

impl SharedState {
    fn store(&self) -> VectorStore {
        VectorStore::new(self.data_dir.join("vector_store"))
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("model_artifacts")
    }

    fn current_model(&self) -> Option<Arc<ModelHandle>> {
        self.model.read().ok().and_then(|guard| guard.clone())
    }

    fn swap_model(&self, handle: ModelHandle) {
        if let Ok(mut guard) = self.model.write() {
            *guard = Some(Arc::new(handle));
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecQuery {
    viewer_id: String,
    k: Option<usize>,
    strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    version: u64,
}

async fn get_recommendations(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<RecQuery>,
) -> Result<Json<RecResponse>, (StatusCode, String)> {
    let strategy: Strategy = query
        .strategy
        .as_deref()
        .unwrap_or("hybrid")
        .parse()
        .map_err(|e: crate::strategy::UnknownStrategy| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let req = RecRequest {
        viewer_id: query.viewer_id,
        k: query.k.unwrap_or(10),
        strategy,
    };

    // Snapshot: this request finishes on the version it starts with
    let handle = state.current_model();
    let response = tokio::task::block_in_place(move || {
        let engine = RecommendationEngine::new(&state.config.engine, state.connector.as_ref());
        match handle {
            Some(handle) => engine.recommend(&handle, &req, &CancelToken::new()),
            // No readable model: the popularity fallback
            None => engine.fallback(req.k, 0, req.strategy),
        }
    });

    match response {
        Ok(resp) => Ok(Json(resp)),
        Err(EngineError::InvalidArgument(msg)) => Err((StatusCode::BAD_REQUEST, msg)),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn post_refresh(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    let started_at = Utc::now();

    let response = tokio::task::block_in_place(move || {
        let current_version = || {
            state
                .current_model()
                .map(|h| h.version)
                .unwrap_or(0)
        };

        // Coalesce: a refresh racing a running build reports skipped
        let Ok(_guard) = state.build_lock.try_lock() else {
            return RefreshResponse {
                status: "skipped",
                started_at,
                finished_at: Utc::now(),
                version: current_version(),
            };
        };

        let store = state.store();
        let embedder = match build_embedder(
            &state.config.embedding.model,
            state.config.embedding_cache_dir(&state.data_dir),
            state.config.embedding.dim,
            state.config.embedding.strict,
        ) {
            Ok(e) => e,
            Err(e) => {
                log::error!("refresh failed to build embedder: {e}");
                return RefreshResponse {
                    status: "failed",
                    started_at,
                    finished_at: Utc::now(),
                    version: current_version(),
                };
            }
        };
        let builder = ModelBuilder::new(
            &state.config,
            state.connector.as_ref(),
            embedder.as_ref(),
            &store,
            state.artifacts_dir(),
        );

        match builder.should_retrain() {
            Ok(RetrainDecision::Fresh(reason)) => {
                log::info!("refresh skipped: {reason}");
                return RefreshResponse {
                    status: "skipped",
                    started_at,
                    finished_at: Utc::now(),
                    version: current_version(),
                };
            }
            Ok(RetrainDecision::Due(reason)) => log::info!("refresh due: {reason}"),
            Err(e) => {
                log::error!("refresh gating failed: {e}");
                return RefreshResponse {
                    status: "failed",
                    started_at,
                    finished_at: Utc::now(),
                    version: current_version(),
                };
            }
        }

        match builder.run() {
            Ok(report) => {
                match ModelHandle::load(&store, &state.artifacts_dir()) {
                    Ok(handle) => state.swap_model(handle),
                    Err(e) => log::error!("built version {} but reload failed: {e}", report.version.version),
                }
                RefreshResponse {
                    status: "ok",
                    started_at,
                    finished_at: Utc::now(),
                    version: report.version.version,
                }
            }
            Err(e) => {
                // A failed build leaves the previous model intact
                log::error!("refresh build failed: {e}");
                RefreshResponse {
                    status: "failed",
                    started_at,
                    finished_at: Utc::now(),
                    version: current_version(),
                }
            }
        }
    });

    Ok(Json(response))
}

async fn start_app(state: Arc<SharedState>) {
    let bind_addr = state.config.server.bind_addr.clone();
    let app = Router::new()
        .route("/api/recommendations", get(get_recommendations))
        .route("/api/refresh", post(post_refresh))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));
    println!("listening on {bind_addr}");
    axum::serve(listener, app).await.expect("server exited");
}

/// Boot the daemon: load the current model if one is readable, then
/// serve until killed.
pub fn start_daemon(config: Config, data_dir: PathBuf, connector: Box<dyn Connector>) {
    let store = VectorStore::new(data_dir.join("vector_store"));
    let artifacts_dir = data_dir.join("model_artifacts");
    let model = match ModelHandle::load(&store, &artifacts_dir) {
        Ok(handle) => {
            log::info!(
                "loaded model version {} ({} events, {} users)",
                handle.version,
                handle.events.len(),
                handle.users.len()
            );
            Some(Arc::new(handle))
        }
        Err(e) => {
            log::warn!("no readable model at startup ({e}); serving fallback until refresh");
            None
        }
    };

    let state = Arc::new(SharedState {
        config,
        data_dir,
        connector,
        model: RwLock::new(model),
        build_lock: Mutex::new(()),
    });

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async { start_app(state).await });
}
