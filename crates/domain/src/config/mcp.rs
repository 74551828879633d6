//! MCP endpoint configuration.
//!
//! These are lightweight config structs for the `[mcp]` section. The
//! session and cooldown logic lives in the `bp-mcp-client` crate.

use serde::{Deserialize, Serialize};

/// Top-level MCP configuration: one optional endpoint per tool kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub bicep: McpEndpointConfig,
    #[serde(default)]
    pub terraform: McpEndpointConfig,
    #[serde(default)]
    pub docs: McpEndpointConfig,
}

/// Configuration for a single streamable-HTTP MCP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpEndpointConfig {
    /// Endpoint URL. Empty/absent means not configured.
    #[serde(default)]
    pub url: Option<String>,
    /// Attempt the handshake even when the URL looks like a human docs
    /// page. Overridable via `AZURE_MCP_BICEP_FORCE` / `TERRAFORM_MCP_FORCE`.
    #[serde(default)]
    pub force: bool,
}

impl McpEndpointConfig {
    /// The URL, trimmed, if non-empty.
    pub fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}
