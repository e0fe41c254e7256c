use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod builder;
mod cli;
mod config;
mod connector;
mod domain;
mod embedding;
mod engine;
mod errors;
mod preprocess;
mod store;
mod strategy;
#[cfg(test)]
mod tests;
mod web;

use cli::{Args, Command};

fn setup_logger() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info") }
    }

    setup_logger();

    let args = Args::parse();
    let data_dir = args.data_dir;

    match args.command {
        Command::Train { force } => cli::handle_train(&data_dir, force),
        Command::Recommend {
            viewer_id,
            k,
            strategy,
        } => cli::handle_recommend(&data_dir, viewer_id, k, strategy),
        Command::Daemon {} => cli::handle_daemon(&data_dir),
        Command::Stats {} => cli::handle_stats(&data_dir),
    }
}
