//! CLI command handlers.

pub mod ask;
pub mod config;
pub mod queue;
pub mod start;

use relay_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server URL to connect to.
    pub server_url: String,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Configuration discovered at startup.
    pub loaded: LoadedConfig,
}
