//! Integration preferences carried in every run-start envelope.
//!
//! Two groups of booleans: which reviewer agents join the team, and which
//! MCP tool endpoints may be contacted. Everything defaults to off except
//! the Architect, which is always on. Unknown keys in incoming payloads
//! are ignored.

use serde::{Deserialize, Serialize};

/// Which role-agents participate in a team run.
///
/// Field names match the wire payload (camelCase for `dataStorage`, as the
/// canvas sends it). The Architect and FinalEditor are not listed: they
/// are unconditionally part of every topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentFlags {
    /// Accepted on the wire but always normalized to `true`.
    pub architect: bool,
    pub security: bool,
    pub identity: bool,
    pub naming: bool,
    pub reliability: bool,
    pub cost: bool,
    pub compliance: bool,
    pub networking: bool,
    pub observability: bool,
    #[serde(rename = "dataStorage")]
    pub data_storage: bool,
}

impl Default for AgentFlags {
    fn default() -> Self {
        Self {
            architect: true,
            security: false,
            identity: false,
            naming: false,
            reliability: false,
            cost: false,
            compliance: false,
            networking: false,
            observability: false,
            data_storage: false,
        }
    }
}

impl AgentFlags {
    /// Every reviewer on. Used when a caller supplies no configuration.
    pub fn all_enabled() -> Self {
        Self {
            architect: true,
            security: true,
            identity: true,
            naming: true,
            reliability: true,
            cost: true,
            compliance: true,
            networking: true,
            observability: true,
            data_storage: true,
        }
    }
}

/// Which optional MCP tool endpoints may be contacted. All default off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct McpFlags {
    pub bicep: bool,
    pub terraform: bool,
    pub docs: bool,
}

/// The full preference envelope: `{ "mcp": {...}, "agents": {...} }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IntegrationSettings {
    pub mcp: McpFlags,
    pub agents: AgentFlags,
}

impl IntegrationSettings {
    /// Normalize an untrusted payload: parse what we recognize, default
    /// the rest to off, and force the Architect on.
    pub fn normalize(payload: Option<&serde_json::Value>) -> Self {
        let mut settings = match payload {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => Self::default(),
        };
        settings.agents.architect = true;
        settings
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
