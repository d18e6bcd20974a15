//! Cairn - split-entry session metadata over a replicated key-value store
//!
//! Main entry point for the Cairn CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, simulate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Cairn - split-entry session metadata over a replicated key-value store
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to load instead of discovering one
    #[arg(long, global = true, env = "CAIRN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a session workload against the in-process store
    Simulate(simulate::SimulateArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => cairn_config::LoadedConfig {
            config: cairn_config::load_config_file(path)?,
            sources: vec![cairn_config::ConfigSource {
                path: path.clone(),
                loaded: true,
            }],
        },
        None => cairn_config::load_config(None)?,
    };

    init_tracing(
        cli.verbose,
        cli.log_json || loaded.config.logging.json,
        &loaded.config.logging.level,
    );

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config: loaded,
    };

    match cli.command {
        Commands::Simulate(args) => simulate::run(args, &ctx),
        Commands::Config(args) => config::run(args, &ctx),
    }
}

/// Console logging on stderr, keeping stdout free for command output.
///
/// `RUST_LOG` wins over the configured level; `--verbose` wins over both.
fn init_tracing(verbose: bool, json: bool, level: &str) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = if verbose {
        EnvFilter::new("cairn=debug,cairn_session=debug,cairn_store=debug,cairn_config=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
        }))
        .with(filter)
        .init();
}
