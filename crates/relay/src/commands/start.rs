//! Start command - launches the relay server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;

use relay_config::RelayConfig;
use relay_server::{EchoGenerator, Server};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Generations allowed to run at once (overrides config)
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Requests allowed to wait for a slot (overrides config)
    #[arg(long)]
    pub max_queue_size: Option<usize>,

    /// Milliseconds a request may wait for a slot (overrides config)
    #[arg(long)]
    pub queue_timeout_ms: Option<u64>,

    /// Delay between streamed words, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub word_delay_ms: u64,

    /// Path to config file (overrides default discovery)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => relay_config::load_config_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ctx.loaded.config.clone(),
    };

    if ctx.verbose {
        let dim = Style::new().dim();
        match &args.config {
            Some(path) => println!("{}", dim.apply_to(format!("Loaded config: {}", path.display()))),
            None => {
                let sources = ctx.loaded.loaded_from();
                if sources.is_empty() {
                    println!("{}", dim.apply_to("No config files found, using defaults + CLI args"));
                }
                for source in sources {
                    println!("{}", dim.apply_to(format!("Loaded config: {}", source.display())));
                }
            }
        }
    }

    apply_overrides(&mut config, &args);
    config.validate()?;
    let server_config = config.server_config()?;

    let generator = EchoGenerator::new().with_word_delay(Duration::from_millis(args.word_delay_ms));
    let server = Server::new(generator, server_config);
    let addr = server.bind_address();

    println!("Relay server starting on http://{}", addr);
    println!("Press Ctrl+C to stop");

    server
        .run_until(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    println!("Server stopped");
    Ok(())
}

/// Fold CLI flags into the file config.
fn apply_overrides(config: &mut RelayConfig, args: &StartArgs) {
    let server = config.server.get_or_insert_with(Default::default);
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(bind) = &args.bind {
        server.bind = bind.clone();
    }

    let queue = config.queue.get_or_insert_with(Default::default);
    if let Some(max) = args.max_concurrent {
        queue.max_concurrent = max;
    }
    if let Some(max) = args.max_queue_size {
        queue.max_queue_size = max;
    }
    if let Some(timeout) = args.queue_timeout_ms {
        queue.queue_timeout_ms = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> StartArgs {
        StartArgs {
            port: None,
            bind: None,
            max_concurrent: None,
            max_queue_size: None,
            queue_timeout_ms: None,
            word_delay_ms: 0,
            config: None,
        }
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config =
            RelayConfig::from_toml("[server]\nport = 9000\n\n[queue]\nmax_concurrent = 2\n").unwrap();
        let args = StartArgs {
            port: Some(7000),
            max_queue_size: Some(3),
            ..args()
        };

        apply_overrides(&mut config, &args);
        let server = config.server_config().unwrap();
        assert_eq!(server.bind_address.port(), 7000);
        assert_eq!(server.queue.max_concurrent, 2);
        assert_eq!(server.queue.max_queue_size, 3);
    }

    #[test]
    fn test_no_overrides_keep_defaults() {
        let mut config = RelayConfig::default();
        apply_overrides(&mut config, &args());
        assert_eq!(
            config.server_config().unwrap().bind_address.to_string(),
            "127.0.0.1:8080"
        );
    }
}
