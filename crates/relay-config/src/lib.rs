//! Configuration system for relay.
//!
//! Provides TOML-based configuration with:
//! - `[server]`, `[queue]`, `[buffer]` sections for `relay start`
//! - `[client]` and `[client.reconnect]` for `relay ask`
//! - Config file layering (user config dir + project-local overrides)
//! - Conversion into the runtime config types of the server and client

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, log_dir, save_config,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
