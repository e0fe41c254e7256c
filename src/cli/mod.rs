use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory holding config.yaml, fixture.json, vector_store/
    /// and model_artifacts/
    #[clap(long, global = true, default_value = "./data", env = "PLAZA_DATA")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the model: embed events and users, compute the similarity
    /// table, publish versioned artifacts
    Train {
        /// Build even if the retrain triggers say the model is fresh
        #[clap(short, long, default_value = "false")]
        force: bool,
    },

    /// Print recommendations for one viewer as JSON
    Recommend {
        /// Viewer user id
        viewer_id: String,

        /// Number of results (1-50)
        #[clap(short, long, default_value = "10")]
        k: usize,

        /// Scoring strategy: hybrid, friends_only, friends_boosted
        #[clap(short, long, default_value = "hybrid")]
        strategy: String,
    },

    /// Start the HTTP serving daemon
    Daemon {},

    /// Show vector-store collection stats
    Stats {},
}
