//! Relay - resumable streaming generation
//!
//! Main entry point for the relay CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ask, config, queue, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Relay - resumable streaming generation server and client
#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: from config, then http://127.0.0.1:8080)
    #[arg(long, global = true, env = "RELAY_SERVER_URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Start(start::StartArgs),

    /// Stream a prompt, resuming the run if the connection drops
    Ask(ask::AskArgs),

    /// Show admission queue occupancy
    Queue(queue::QueueArgs),

    /// Inspect or create configuration files
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "relay=debug,relay_server=debug,relay_client=debug,relay_buffer=debug,relay_config=debug,info"
    } else {
        "relay=info,relay_server=info,relay_client=info,relay_buffer=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(relay_config::log_dir(), "relay.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "relay=trace,relay_server=trace,relay_client=trace,relay_buffer=trace,relay_config=trace,info",
                )),
        )
        .init();

    let loaded = relay_config::load_config(None)?;
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }

    let server_url = cli
        .server
        .unwrap_or_else(|| loaded.config.server_url());

    let ctx = commands::Context {
        server_url,
        json_output: cli.json,
        verbose: cli.verbose,
        loaded,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Queue(args) => queue::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
