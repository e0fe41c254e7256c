use anyhow::{Context, Result};
use std::path::Path;

use crate::builder::{ModelBuilder, RetrainDecision};
use crate::config::Config;
use crate::connector::{Connector, FixtureConnector};
use crate::embedding::build_embedder;
use crate::engine::{CancelToken, ModelHandle, RecRequest, RecommendationEngine};
use crate::errors::EngineError;
use crate::store::VectorStore;
use crate::strategy::Strategy;

/// The connector every command talks to. Production deployments slot a
/// live backend behind the same trait; the shipped binary reads the
/// JSON fixture in the data directory.
pub fn open_connector(data_dir: &Path) -> Result<Box<dyn Connector>> {
    let fixture_path = data_dir.join("fixture.json");
    let connector = FixtureConnector::from_file(&fixture_path)
        .with_context(|| format!("failed to load {}", fixture_path.display()))?;
    Ok(Box::new(connector))
}

pub fn handle_train(data_dir: &Path, force: bool) -> Result<()> {
    let config = Config::load_with(data_dir)?;
    let connector = open_connector(data_dir)?;
    let embedder = build_embedder(
        &config.embedding.model,
        config.embedding_cache_dir(data_dir),
        config.embedding.dim,
        config.embedding.strict,
    )
    .context("failed to initialize embedder")?;
    let store = VectorStore::new(data_dir.join("vector_store"));
    let builder = ModelBuilder::new(
        &config,
        connector.as_ref(),
        embedder.as_ref(),
        &store,
        data_dir.join("model_artifacts"),
    );

    if !force {
        if let RetrainDecision::Fresh(reason) = builder.should_retrain()? {
            println!("skipped: {reason} (use --force to rebuild)");
            return Ok(());
        }
    }

    let report = builder.run().context("model build failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn handle_recommend(data_dir: &Path, viewer_id: String, k: usize, strategy: String) -> Result<()> {
    let config = Config::load_with(data_dir)?;
    let connector = open_connector(data_dir)?;
    let strategy: Strategy = strategy
        .parse()
        .map_err(|e: crate::strategy::UnknownStrategy| anyhow::anyhow!(e))?;
    let req = RecRequest {
        viewer_id,
        k,
        strategy,
    };

    let store = VectorStore::new(data_dir.join("vector_store"));
    let engine = RecommendationEngine::new(&config.engine, connector.as_ref());
    let response = match ModelHandle::load(&store, &data_dir.join("model_artifacts")) {
        Ok(handle) => engine.recommend(&handle, &req, &CancelToken::new()),
        Err(EngineError::Integrity(reason)) => {
            log::warn!("model unreadable ({reason}); serving fallback");
            engine.fallback(req.k, 0, req.strategy)
        }
        Err(e) => Err(e),
    };

    match response {
        Ok(resp) => {
            println!("{}", serde_json::to_string_pretty(&resp)?);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

pub fn handle_daemon(data_dir: &Path) -> Result<()> {
    let config = Config::load_with(data_dir)?;
    let connector = open_connector(data_dir)?;
    crate::web::start_daemon(config, data_dir.to_path_buf(), connector);
    Ok(())
}

pub fn handle_stats(data_dir: &Path) -> Result<()> {
    let store = VectorStore::new(data_dir.join("vector_store"));
    for name in ["events", "users", "user_sim"] {
        match store.stat(name) {
            Ok(stat) => println!(
                "{name}: {} rows, dim {}, created {}",
                stat.rows, stat.dim, stat.created_at
            ),
            Err(e) => println!("{name}: unavailable ({e})"),
        }
    }
    if let Some(version) = crate::builder::latest_version(&data_dir.join("model_artifacts"))? {
        println!(
            "model version {} built {} ({} events, {} users)",
            version.version, version.created_at, version.events, version.users
        );
    } else {
        println!("no model built yet");
    }
    Ok(())
}
