//! Configuration system for Cairn.
//!
//! Provides TOML-based configuration with:
//! - `[store]`: partition count, durable tier, lock timeout
//! - `[session]`: lock-on-read and the default max inactive interval
//! - `[logging]`: filter level and output format
//!
//! Files are layered: the user config directory first, then a project-local
//! `cairn.toml`.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::{CairnConfig, LoggingConfig};
