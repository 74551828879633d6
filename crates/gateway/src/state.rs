use std::sync::Arc;

use bp_backends::ChatBackend;
use bp_domain::config::Config;
use bp_mcp_client::McpRegistry;
use bp_team::TraceBus;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The active chat backend (one family per process).
    pub backend: Arc<dyn ChatBackend>,
    /// Per-run trace fan-out + journal.
    pub bus: Arc<TraceBus>,
    /// Optional MCP tool sessions for schema-grounded IaC.
    pub mcp: Arc<McpRegistry>,
}
