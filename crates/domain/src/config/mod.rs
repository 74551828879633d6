//! Configuration types deserialized from `config.toml`.
//!
//! Every section has per-field serde defaults so an empty file (or no
//! file at all) yields a runnable dev configuration. Environment
//! overrides for the journal directory and MCP force flags are applied
//! in [`Config::apply_env_overrides`].

mod backend;
mod mcp;
mod server;
mod trace;

pub use backend::*;
pub use mcp::*;
pub use server::*;
pub use trace::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Apply environment overrides on top of the parsed file. The names
    /// match what operators already export for the Python deployment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TRACE_LOG_DIR") {
            self.trace.journal_dir = if dir.is_empty() { None } else { Some(dir.into()) };
        }
        if env_flag("AZURE_MCP_BICEP_FORCE") {
            self.mcp.bicep.force = true;
        }
        if env_flag("TERRAFORM_MCP_FORCE") {
            self.mcp.terraform.force = true;
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
