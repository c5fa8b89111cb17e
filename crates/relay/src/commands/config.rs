//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use console::Style;

use relay_config::RelayConfig;

use super::Context;

/// Project-local config file written by `init --local`.
const LOCAL_CONFIG_FILE: &str = "relay.toml";

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration, defaults included
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Write a config file with every setting at its default
    Init {
        /// Create project-local config (./relay.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the user configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, force } => cmd_init(local, force),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let resolved = ctx.loaded.config.resolved();
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        print!("{}", resolved.to_toml()?);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let dim = Style::new().dim();
    println!("Config file search order (later overrides earlier):\n");

    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, dim.apply_to(source.path.display()));
    }

    println!();
    match ctx.loaded.loaded_from().len() {
        0 => println!("No config files found. Run 'relay config init' to create one."),
        n => println!("{} config file(s) loaded.", n),
    }
    Ok(())
}

fn cmd_init(local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from(LOCAL_CONFIG_FILE)
    } else {
        relay_config::xdg_config_path()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
    };

    if path.exists() && !force {
        println!("Config file already exists: {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    relay_config::save_config(&RelayConfig::default().resolved(), &path)?;
    println!("✓ Created config file: {}", path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    match relay_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Could not determine config directory"),
    }
    Ok(())
}
