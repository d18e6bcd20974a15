//! CLI command handlers.

pub mod config;
pub mod simulate;

use cairn_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Resolved configuration and where it came from.
    pub config: LoadedConfig,
}
